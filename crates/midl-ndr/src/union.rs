//! Non-encapsulated unions
//!
//! A `[switch_is(x)] union` travels as its switch value (u32 in NDR20)
//! followed by the selected arm. The enclosing structure usually carries the
//! same value in one of its own fields; it is transmitted again here.

use crate::{NdrReader, NdrWriter, Result};

/// A discriminated union whose arms are selected by a u32 switch value
pub trait NdrUnion: Sized {
    /// Switch value of the active arm
    fn switch_value(&self) -> u32;

    /// Inline part of the active arm
    fn encode_arm(&self, w: &mut NdrWriter) -> Result<()>;

    /// Deferred part of the active arm
    fn encode_arm_deferred(&self, _w: &mut NdrWriter) -> Result<()> {
        Ok(())
    }

    /// Decode the arm for `switch`; unknown values are
    /// [`NdrError::InvalidDiscriminant`](crate::NdrError::InvalidDiscriminant)
    fn decode_arm(switch: u32, r: &mut NdrReader) -> Result<Self>;

    /// Deferred part of the decoded arm
    fn decode_arm_deferred(&mut self, _r: &mut NdrReader) -> Result<()> {
        Ok(())
    }
}
