//! DCOM error types and HRESULT values

use thiserror::Error;

/// Result type for DCOM operations
pub type Result<T> = std::result::Result<T, DcomError>;

/// DCOM errors
#[derive(Error, Debug)]
pub enum DcomError {
    #[error("DCE RPC error: {0}")]
    Rpc(#[from] dcerpc::RpcError),

    #[error("NDR error: {0}")]
    Ndr(#[from] midl_ndr::NdrError),

    /// A DCOM method returned a failing HRESULT
    #[error("{operation}: HRESULT 0x{code:08x}")]
    Hresult { operation: &'static str, code: u32 },

    /// A plain RPC method returned a non-zero Win32 status
    #[error("{operation}: win32 error 0x{code:08x}")]
    Win32 { operation: &'static str, code: u32 },

    /// The object client has no IPID to address
    #[error("{0}: ipid is missing")]
    MissingIpid(&'static str),

    #[error("invalid OBJREF: {0}")]
    InvalidObjRef(String),

    #[error("invalid string binding: {0}")]
    InvalidStringBinding(String),

    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("unknown IPID {0}")]
    UnknownIpid(String),

    #[error("IPID {0} is already exported")]
    DuplicateIpid(String),
}

impl DcomError {
    /// HRESULT carried by the error, if it has one
    pub fn hresult(&self) -> Option<u32> {
        match self {
            DcomError::Hresult { code, .. } => Some(*code),
            DcomError::Rpc(e) => e.fault_status(),
            _ => None,
        }
    }
}

/// Errors raised by server implementations travel back as faults
impl From<DcomError> for dcerpc::RpcError {
    fn from(err: DcomError) -> Self {
        match err {
            DcomError::Rpc(e) => e,
            DcomError::Ndr(e) => dcerpc::RpcError::Ndr(e),
            DcomError::Hresult { code, .. } | DcomError::Win32 { code, .. } => {
                dcerpc::RpcError::Fault(code)
            }
            DcomError::UnknownIpid(_) => dcerpc::RpcError::Fault(hresult::RPC_E_INVALID_IPID),
            _ => dcerpc::RpcError::Fault(hresult::E_FAIL),
        }
    }
}

/// Map a DCOM method's non-zero return value to an error
pub fn check_hresult(operation: &'static str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(DcomError::Hresult {
            operation,
            code: code as u32,
        })
    }
}

/// Map a plain RPC method's non-zero status to an error
pub fn check_win32(operation: &'static str, code: u32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(DcomError::Win32 { operation, code })
    }
}

/// HRESULT codes (MS-ERREF 2.1)
pub mod hresult {
    pub const S_OK: u32 = 0x0000_0000;
    pub const S_FALSE: u32 = 0x0000_0001;
    pub const E_NOTIMPL: u32 = 0x8000_4001;
    pub const E_NOINTERFACE: u32 = 0x8000_4002;
    pub const E_POINTER: u32 = 0x8000_4003;
    pub const E_FAIL: u32 = 0x8000_4005;
    pub const E_UNEXPECTED: u32 = 0x8000_FFFF;
    pub const E_ACCESSDENIED: u32 = 0x8007_0005;
    pub const E_OUTOFMEMORY: u32 = 0x8007_000E;
    pub const E_INVALIDARG: u32 = 0x8007_0057;
    /// The object exporter does not know the IPID
    pub const RPC_E_INVALID_IPID: u32 = 0x8001_0113;
    /// HRESULT_FROM_WIN32(ERROR_INSUFFICIENT_BUFFER)
    pub const E_INSUFFICIENT_BUFFER: u32 = from_win32(122);

    const FACILITY_WIN32: u32 = 7;

    /// HRESULT_FROM_WIN32
    pub const fn from_win32(code: u32) -> u32 {
        if code as i32 <= 0 {
            code
        } else {
            (code & 0x0000_FFFF) | (FACILITY_WIN32 << 16) | 0x8000_0000
        }
    }

    /// Negative HRESULTs are failures
    pub fn failed(code: u32) -> bool {
        (code as i32) < 0
    }

    pub fn name(code: u32) -> &'static str {
        match code {
            S_OK => "S_OK",
            S_FALSE => "S_FALSE",
            E_NOTIMPL => "E_NOTIMPL",
            E_NOINTERFACE => "E_NOINTERFACE",
            E_POINTER => "E_POINTER",
            E_FAIL => "E_FAIL",
            E_UNEXPECTED => "E_UNEXPECTED",
            E_ACCESSDENIED => "E_ACCESSDENIED",
            E_OUTOFMEMORY => "E_OUTOFMEMORY",
            E_INVALIDARG => "E_INVALIDARG",
            RPC_E_INVALID_IPID => "RPC_E_INVALID_IPID",
            E_INSUFFICIENT_BUFFER => "ERROR_INSUFFICIENT_BUFFER",
            _ => "unknown",
        }
    }
}
