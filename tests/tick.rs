// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

use rstest::{fixture, rstest};
use tspi::{
    mocktpm::MockTpm,
    tick::{
        read_current_ticks, tick_stamp_blob, TcsKeyHandle, TickStamp, TpmAuth, TransportCommand,
        TransportSession, TPM_ORD_GET_TICKS, TPM_ORD_TICK_STAMP_BLOB,
    },
    BlobError, Sha1Digest, TspError,
};

const KEY: TcsKeyHandle = TcsKeyHandle(0x0100_0001);
const KEY_HASH: Sha1Digest = [0x42; 20];

#[fixture]
fn device() -> MockTpm {
    let mut device = MockTpm::new();
    device.load_key(KEY, KEY_HASH);
    device
}

#[rstest]
fn test_read_current_ticks(mut device: MockTpm) {
    let ticks = read_current_ticks(&mut device).unwrap();
    assert!(device.transport_open());
    assert_eq!(device.executed(), &[TPM_ORD_GET_TICKS]);

    assert_eq!(ticks.len(), 32);
    assert_eq!(&ticks[..2], &[0x00, 0x14]);
    assert_eq!(&ticks[2..10], &1u64.to_be_bytes());

    let later = read_current_ticks(&mut device).unwrap();
    assert_eq!(&later[2..10], &2u64.to_be_bytes());
}

#[rstest]
fn test_tick_stamp_blob(mut device: MockTpm) {
    let anti_replay = [0x11; 20];
    let digest = [0x22; 20];
    let mut auth = TpmAuth {
        handle: 0x0200_0000,
        nonce_odd: [0x33; 20],
        ..TpmAuth::default()
    };

    let TickStamp {
        signature,
        tick_count,
    } = tick_stamp_blob(&mut device, KEY, &anti_replay, &digest, Some(&mut auth)).unwrap();

    assert_eq!(device.executed(), &[TPM_ORD_TICK_STAMP_BLOB]);
    assert_eq!(signature.len(), 20);
    assert_eq!(tick_count.len(), 32);
    assert_ne!(auth.nonce_even, [0; 20]);
}

#[rstest]
fn test_tick_stamp_blob_unknown_key(mut device: MockTpm) {
    let mut auth = TpmAuth::default();
    assert_eq!(
        tick_stamp_blob(
            &mut device,
            TcsKeyHandle(5),
            &[0; 20],
            &[0; 20],
            Some(&mut auth)
        ),
        Err(TspError::InvalidHandle)
    );
    assert!(device.executed().is_empty());
}

#[rstest]
fn test_tick_stamp_blob_requires_auth(mut device: MockTpm) {
    assert!(matches!(
        tick_stamp_blob(&mut device, KEY, &[0; 20], &[0; 20], None),
        Err(TspError::Transport(_))
    ));
}

/// A session whose replies are cut short.
struct ShortReply(Vec<u8>);

impl TransportSession for ShortReply {
    fn init(&mut self) -> Result<(), TspError> {
        Ok(())
    }

    fn execute(&mut self, _command: TransportCommand<'_>) -> Result<Vec<u8>, TspError> {
        Ok(self.0.clone())
    }

    fn key_pub_hash(&self, _key: TcsKeyHandle) -> Result<Sha1Digest, TspError> {
        Ok(KEY_HASH)
    }
}

#[rstest]
#[case(vec![], 4, 0)]
#[case(vec![0x00, 0x00], 4, 2)]
#[case(vec![0x00, 0x00, 0x00, 0x08, 0xaa], 8, 1)]
fn test_read_current_ticks_truncated(
    #[case] reply: Vec<u8>,
    #[case] needed: usize,
    #[case] available: usize,
) {
    let mut session = ShortReply(reply);
    assert_eq!(
        read_current_ticks(&mut session),
        Err(TspError::Blob(BlobError::Underflow { needed, available }))
    );
}

#[test]
fn test_tick_stamp_blob_truncated_tick_count() {
    let mut session = ShortReply(vec![0x00, 0x00, 0x00, 0x01, 0xee]);
    assert_eq!(
        tick_stamp_blob(&mut session, KEY, &[0; 20], &[0; 20], None),
        Err(TspError::Blob(BlobError::Underflow {
            needed: 4,
            available: 0
        }))
    );
}
