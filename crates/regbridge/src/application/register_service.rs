//! RegisterService: the two register use cases a session performs.
//!
//! The service holds a shared [`RegisterStore`] (the process-wide memory
//! window in production) plus the fixed offsets and codec.  It is cheap to
//! clone behind an `Arc` and carries no per-session state.

use std::sync::Arc;

use regbridge_core::{
    encode_for_stream, parse_inbound_digits, AccessError, DecodeError, RegisterBytes,
    RegisterCodec, RegisterOffsets, RegisterStore,
};
use thiserror::Error;

/// Failure to apply one inbound command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command bytes were not a valid decimal number.  Recoverable: the
    /// command is dropped and the session continues.
    #[error("malformed command: {0}")]
    Decode(#[from] DecodeError),

    /// The register could not be written.
    #[error("register write failed: {0}")]
    Access(#[from] AccessError),
}

/// Register read/write use cases shared by all sessions.
pub struct RegisterService {
    store: Arc<dyn RegisterStore>,
    offsets: RegisterOffsets,
    codec: RegisterCodec,
}

impl RegisterService {
    pub fn new(
        store: Arc<dyn RegisterStore>,
        offsets: RegisterOffsets,
        codec: RegisterCodec,
    ) -> Self {
        Self {
            store,
            offsets,
            codec,
        }
    }

    pub fn offsets(&self) -> RegisterOffsets {
        self.offsets
    }

    /// Reads the read register and returns the bytes to put on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] if the store cannot be read.
    pub fn sample(&self) -> Result<RegisterBytes, AccessError> {
        let raw = self.store.read_word(self.offsets.read_offset)?;
        Ok(encode_for_stream(raw))
    }

    /// Decodes `payload` as an ASCII decimal number and stores it at the
    /// write register.  Returns the value written.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Decode`] if `payload` is not a valid number; nothing
    ///   is written.
    /// - [`CommandError::Access`] if the store rejects the write.
    pub fn apply_command(&self, payload: &[u8]) -> Result<u32, CommandError> {
        let value = parse_inbound_digits(payload)?;
        self.store
            .write_at(self.offsets.write_offset, &self.codec.encode_for_write(value))?;
        Ok(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use regbridge_core::{ByteOrder, InMemoryRegisters};

    fn service_with(store: Arc<InMemoryRegisters>) -> RegisterService {
        RegisterService::new(
            store,
            RegisterOffsets::new(0, 4),
            RegisterCodec::new(ByteOrder::Big),
        )
    }

    #[test]
    fn test_sample_returns_read_register_bytes_verbatim() {
        // Arrange
        let store = Arc::new(InMemoryRegisters::from_bytes(vec![
            0x00, 0x00, 0x00, 0x2A, 0, 0, 0, 0,
        ]));
        let service = service_with(store);

        // Act
        let frame = service.sample().unwrap();

        // Assert
        assert_eq!(frame, [0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_apply_command_writes_encoded_value_at_write_offset() {
        // Arrange
        let store = Arc::new(InMemoryRegisters::new(8));
        let service = service_with(Arc::clone(&store));

        // Act
        let value = service.apply_command(b"17").unwrap();

        // Assert
        assert_eq!(value, 17);
        assert_eq!(*store.writes.lock().unwrap(), vec![(4, vec![0, 0, 0, 17])]);
        let stored = store.read_word(4).unwrap();
        assert_eq!(RegisterCodec::new(ByteOrder::Big).decode_register(&stored).unwrap(), 17);
    }

    #[test]
    fn test_apply_command_does_not_touch_read_register() {
        let store = Arc::new(InMemoryRegisters::from_bytes(vec![9, 9, 9, 9, 0, 0, 0, 0]));
        let service = service_with(Arc::clone(&store));

        service.apply_command(b"65535").unwrap();

        assert_eq!(&store.snapshot()[..4], &[9, 9, 9, 9]);
    }

    #[test]
    fn test_malformed_command_is_rejected_without_write() {
        let store = Arc::new(InMemoryRegisters::new(8));
        let service = service_with(Arc::clone(&store));

        let result = service.apply_command(b"1a");

        assert!(matches!(
            result,
            Err(CommandError::Decode(DecodeError::NonDigit { byte: b'a', .. }))
        ));
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_store_failure_surfaces_as_access_error() {
        let service = service_with(Arc::new(InMemoryRegisters::failing(8)));

        assert!(matches!(
            service.apply_command(b"1"),
            Err(CommandError::Access(_))
        ));
        assert!(service.sample().is_err());
    }

    #[test]
    fn test_little_endian_codec_changes_stored_layout() {
        let store = Arc::new(InMemoryRegisters::new(8));
        let service = RegisterService::new(
            Arc::clone(&store) as Arc<dyn RegisterStore>,
            RegisterOffsets::new(0, 4),
            RegisterCodec::new(ByteOrder::Little),
        );

        service.apply_command(b"42").unwrap();

        assert_eq!(&store.snapshot()[4..], &[42, 0, 0, 0]);
    }
}
