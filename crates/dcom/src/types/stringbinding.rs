//! DUALSTRINGARRAY (MS-DCOM 2.2.19)
//!
//! The array is a flat run of u16 units: string bindings, an empty
//! terminator, then security bindings and another terminator.
//! `security_offset` indexes the first security binding.

use super::error::{DcomError, Result};
use bytes::{Buf, BufMut};
use midl_ndr::{NdrDecode, NdrEncode, NdrReader, NdrWriter};
use std::fmt;

/// Tower identifiers for string bindings
pub mod protocol_id {
    pub const NCACN_IP_TCP: u16 = 0x07;
    pub const NCACN_NP: u16 = 0x0F;
    pub const NCALRPC: u16 = 0x10;
    pub const NCACN_HTTP: u16 = 0x1F;
}

/// Authentication services named in security bindings
pub mod authn_svc {
    pub const NONE: u16 = 0;
    pub const GSS_NEGOTIATE: u16 = 9;
    pub const WINNT: u16 = 10;
    pub const GSS_KERBEROS: u16 = 16;
}

/// STRINGBINDING: tower id and network address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringBinding {
    pub tower_id: u16,
    pub network_addr: String,
}

impl StringBinding {
    pub fn new(tower_id: u16, network_addr: impl Into<String>) -> Self {
        Self {
            tower_id,
            network_addr: network_addr.into(),
        }
    }

    /// `ncacn_ip_tcp` binding, e.g. "10.0.0.1[4135]"
    pub fn tcp(addr: &str) -> Self {
        Self::new(protocol_id::NCACN_IP_TCP, addr)
    }

    fn push_units(&self, units: &mut Vec<u16>) {
        units.push(self.tower_id);
        units.extend(self.network_addr.encode_utf16());
        units.push(0);
    }
}

impl fmt::Display for StringBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.tower_id {
            protocol_id::NCACN_IP_TCP => "ncacn_ip_tcp",
            protocol_id::NCACN_NP => "ncacn_np",
            protocol_id::NCACN_HTTP => "ncacn_http",
            protocol_id::NCALRPC => "ncalrpc",
            _ => "unknown",
        };
        write!(f, "{}:{}", proto, self.network_addr)
    }
}

/// SECURITYBINDING: authentication and authorization service plus principal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityBinding {
    pub authn_svc: u16,
    pub authz_svc: u16,
    pub principal_name: String,
}

impl SecurityBinding {
    pub fn new(authn_svc: u16, authz_svc: u16, principal_name: impl Into<String>) -> Self {
        Self {
            authn_svc,
            authz_svc,
            principal_name: principal_name.into(),
        }
    }

    fn push_units(&self, units: &mut Vec<u16>) {
        units.push(self.authn_svc);
        units.push(self.authz_svc);
        units.extend(self.principal_name.encode_utf16());
        units.push(0);
    }
}

/// DUALSTRINGARRAY
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DualStringArray {
    /// Every u16 unit following the header
    pub entries: Vec<u16>,
    pub security_offset: u16,
}

impl Default for DualStringArray {
    /// No string bindings and no security bindings
    fn default() -> Self {
        Self::new(&[], &[])
    }
}

impl DualStringArray {
    pub fn new(strings: &[StringBinding], security: &[SecurityBinding]) -> Self {
        let mut entries = Vec::new();
        for binding in strings {
            binding.push_units(&mut entries);
        }
        if strings.is_empty() {
            entries.push(0);
        }
        entries.push(0);
        let security_offset = entries.len() as u16;
        for binding in security {
            binding.push_units(&mut entries);
        }
        if security.is_empty() {
            entries.push(0);
        }
        entries.push(0);
        Self {
            entries,
            security_offset,
        }
    }

    /// One TCP string binding and no security bindings
    pub fn with_tcp_binding(addr: &str) -> Self {
        Self::new(&[StringBinding::tcp(addr)], &[])
    }

    /// Parse the string bindings
    pub fn string_bindings(&self) -> Result<Vec<StringBinding>> {
        let end = (self.security_offset as usize).min(self.entries.len());
        let mut out = Vec::new();
        for item in split_items(&self.entries[..end]) {
            let (&tower_id, addr) = match item.split_first() {
                Some(parts) => parts,
                None => continue,
            };
            out.push(StringBinding {
                tower_id,
                network_addr: decode_utf16(addr)?,
            });
        }
        Ok(out)
    }

    /// Parse the security bindings
    pub fn security_bindings(&self) -> Result<Vec<SecurityBinding>> {
        let start = (self.security_offset as usize).min(self.entries.len());
        let units = &self.entries[start..];
        let mut out = Vec::new();
        let mut pos = 0;
        // authz_svc may legitimately be zero, so items are not split on it
        while let Some(&authn_svc) = units.get(pos) {
            if authn_svc == 0 {
                break;
            }
            let authz_svc = *units.get(pos + 1).ok_or_else(|| {
                DcomError::InvalidStringBinding("truncated security binding".to_string())
            })?;
            let name_start = pos + 2;
            let name_len = units[name_start.min(units.len())..]
                .iter()
                .position(|unit| *unit == 0)
                .ok_or_else(|| {
                    DcomError::InvalidStringBinding("unterminated principal name".to_string())
                })?;
            out.push(SecurityBinding {
                authn_svc,
                authz_svc,
                principal_name: decode_utf16(&units[name_start..name_start + name_len])?,
            });
            pos = name_start + name_len + 1;
        }
        Ok(out)
    }

    /// Raw little-endian form used inside an OBJREF
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.entries.len() as u16);
        buf.put_u16_le(self.security_offset);
        for unit in &self.entries {
            buf.put_u16_le(*unit);
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(DcomError::BufferUnderflow {
                needed: 4,
                have: buf.remaining(),
            });
        }
        let count = buf.get_u16_le() as usize;
        let security_offset = buf.get_u16_le();
        if buf.remaining() < count * 2 {
            return Err(DcomError::BufferUnderflow {
                needed: count * 2,
                have: buf.remaining(),
            });
        }
        if security_offset as usize > count {
            return Err(DcomError::InvalidStringBinding(format!(
                "security offset {} past {} entries",
                security_offset, count
            )));
        }
        let entries = (0..count).map(|_| buf.get_u16_le()).collect();
        Ok(Self {
            entries,
            security_offset,
        })
    }
}

/// Items of a zero-terminated run, stopping at the empty item
fn split_items(units: &[u16]) -> impl Iterator<Item = &[u16]> {
    units
        .split(|unit| *unit == 0)
        .take_while(|item| !item.is_empty())
}

fn decode_utf16(units: &[u16]) -> Result<String> {
    String::from_utf16(units)
        .map_err(|_| DcomError::InvalidStringBinding("invalid UTF-16 string".to_string()))
}

/// NDR form: wNumEntries is the conformance of aStringArray
impl NdrEncode for DualStringArray {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_size(self.entries.len())?;
        w.write_u16(self.entries.len() as u16);
        w.write_u16(self.security_offset);
        for unit in &self.entries {
            w.write_u16(*unit);
        }
        Ok(())
    }
}

impl NdrDecode for DualStringArray {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        let max_count = r.read_size()?;
        let _num_entries = r.read_u16()?;
        let security_offset = r.read_u16()?;
        let entries = r.read_elements::<u16>(max_count, "aStringArray")?;
        Ok(Self {
            entries,
            security_offset,
        })
    }
}
