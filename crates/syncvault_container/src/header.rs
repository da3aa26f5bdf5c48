//! Container magic header.

use crate::error::{ContainerError, ContainerResult};
use std::io::{self, Read, Seek, SeekFrom};

/// Magic bytes at the start of every container.
pub const HEADER: [u8; 5] = *b"C1ZF\x00";

/// Length of [`HEADER`] in bytes.
pub const HEADER_LEN: usize = HEADER.len();

/// Consumes and validates the header from the front of `reader`.
///
/// # Errors
///
/// Returns `InvalidHeader` if the stream is shorter than the header or the
/// bytes do not match.
pub fn read_header<R: Read + ?Sized>(reader: &mut R) -> ContainerResult<()> {
    let mut buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ContainerError::InvalidHeader)
        }
        Err(err) => return Err(err.into()),
    }
    if buf != HEADER {
        return Err(ContainerError::InvalidHeader);
    }
    Ok(())
}

/// Reports whether a seekable stream starts with the container header.
///
/// The stream is rewound to the start before and after the check, so the
/// same handle can be passed to [`crate::decode`] afterwards.
///
/// # Errors
///
/// Returns an error only on I/O failure; a mismatch yields `Ok(false)`.
pub fn check_header<R: Read + Seek + ?Sized>(reader: &mut R) -> ContainerResult<bool> {
    reader.seek(SeekFrom::Start(0))?;
    let matched = match read_header(reader) {
        Ok(()) => true,
        Err(ContainerError::InvalidHeader) => false,
        Err(err) => return Err(err),
    };
    reader.seek(SeekFrom::Start(0))?;
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn accepts_magic() {
        let mut input = Cursor::new(b"C1ZF\x00rest".to_vec());
        read_header(&mut input).unwrap();
        assert_eq!(input.position(), 5);
    }

    #[test]
    fn rejects_short_and_wrong() {
        assert!(matches!(
            read_header(&mut Cursor::new(b"C1Z".to_vec())),
            Err(ContainerError::InvalidHeader)
        ));
        assert!(matches!(
            read_header(&mut Cursor::new(b"SQLite format 3".to_vec())),
            Err(ContainerError::InvalidHeader)
        ));
    }

    #[test]
    fn check_header_rewinds() {
        let mut input = Cursor::new(b"C1ZF\x00payload".to_vec());
        input.set_position(3);
        assert!(check_header(&mut input).unwrap());
        assert_eq!(input.position(), 0);

        let mut other = Cursor::new(b"nope".to_vec());
        assert!(!check_header(&mut other).unwrap());
        assert_eq!(other.position(), 0);
    }
}
