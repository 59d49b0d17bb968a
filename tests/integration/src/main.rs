//! Integration test runner
//!
//! Runs every integration test target and prints a summary.
//!
//! # Usage
//!
//! ```text
//! cargo run -p integration-tests
//! cargo run -p integration-tests -- dcom_tests msrpc_tests
//! ```
//!
//! A single target runs directly:
//!
//! ```text
//! cargo test -p integration-tests --test ndr_tests
//! RUST_LOG=dcerpc=debug cargo test -p integration-tests --test dcom_tests -- --nocapture
//! ```

use std::process::Command;
use std::time::{Duration, Instant};

struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "NDR Tests",
        description: "Structs, unions, pointers and arrays through the marshalling engine",
        test_name: "ndr_tests",
    },
    TestCategory {
        name: "Fragmentation Tests",
        description: "Multi-fragment requests and responses",
        test_name: "fragmentation_tests",
    },
    TestCategory {
        name: "DCOM Tests",
        description: "IPID routing, IRemUnknown and IDispatch",
        test_name: "dcom_tests",
    },
    TestCategory {
        name: "MSRPC Tests",
        description: "IIS, WMI, InitShutdown and msgsvc bindings",
        test_name: "msrpc_tests",
    },
];

fn run_test_category(category: &TestCategory) -> (bool, Duration, String) {
    println!("\n{}", "=".repeat(80));
    println!("Running: {} - {}", category.name, category.description);
    println!("{}", "=".repeat(80));

    let start = Instant::now();
    let output = Command::new(env!("CARGO"))
        .args(["test", "-p", "integration-tests", "--test", category.test_name])
        .output();
    let duration = start.elapsed();

    match output {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            let summary = if output.status.success() {
                "PASSED".to_string()
            } else {
                format!("FAILED (exit code: {:?})", output.status.code())
            };
            (output.status.success(), duration, summary)
        }
        Err(e) => (false, duration, format!("failed to execute: {}", e)),
    }
}

fn main() {
    let selected: Vec<String> = std::env::args().skip(1).collect();
    let categories: Vec<&TestCategory> = TEST_CATEGORIES
        .iter()
        .filter(|c| selected.is_empty() || selected.iter().any(|s| s == c.test_name))
        .collect();
    if categories.is_empty() {
        eprintln!("no test target matches {:?}", selected);
        std::process::exit(2);
    }

    let total_start = Instant::now();
    let results: Vec<_> = categories
        .iter()
        .map(|category| {
            let (success, duration, summary) = run_test_category(category);
            (category.name, success, duration, summary)
        })
        .collect();

    let failed = results.iter().filter(|(_, s, _, _)| !*s).count();

    println!("\n{}", "=".repeat(80));
    println!(
        "Categories: {} | Passed: {} | Failed: {} | Total: {:?}",
        results.len(),
        results.len() - failed,
        failed,
        total_start.elapsed()
    );
    println!("{:<25} {:<8} {:<15} Details", "Category", "Status", "Duration");
    println!("{}", "-".repeat(80));
    for (name, success, duration, summary) in &results {
        let status = if *success { "PASS" } else { "FAIL" };
        println!("{:<25} {:<8} {:<15?} {}", name, status, duration, summary);
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
