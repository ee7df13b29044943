//! Optional message framing for the raw channels.
//!
//! The FIFOs carry an unstructured byte stream and the bridge imposes no
//! boundaries on what the engine exchanges over them. Peers that need
//! message boundaries and have no framing of their own can use this
//! contract: a 4-byte little-endian payload length followed by the payload.
//! Both peers must agree on it out of band.

use std::io::{self, Read, Write};

/// Size of the length prefix
pub const HEADER_LEN: usize = 4;

/// Write one frame and flush
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes does not fit a u32 length", payload.len()),
        )
    })?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;

    tracing::trace!("Wrote frame of {} bytes", len);
    Ok(())
}

/// Read one frame. Lengths above `max_len` are refused before any payload
/// is read, and the stream is not resynchronised afterwards.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit {max_len}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    tracing::trace!("Read frame of {} bytes", len);
    Ok(payload)
}
