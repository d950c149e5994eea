//! Round-trip properties of the instruction codec.

#![allow(clippy::unwrap_used)]

use memlink_protocol::{
    HEADER_SIZE, Instruction, MAX_READ_BLOCKS, ProtocolError, ReadBlock, SETUP_INSTRUCTION_SIZE,
    SetupInstruction, WriteInstruction,
};
use proptest::prelude::*;

fn read_block() -> impl Strategy<Value = ReadBlock> {
    (any::<u32>(), any::<u32>(), 0..=i32::MAX).prop_map(|(position, game_address, length)| {
        ReadBlock {
            position,
            game_address,
            length,
        }
    })
}

proptest! {
    #[test]
    fn setup_roundtrip(blocks in prop::collection::vec(read_block(), 0..=MAX_READ_BLOCKS)) {
        let setup = Instruction::Setup(SetupInstruction::new(blocks).unwrap());
        let bytes = setup.encode().unwrap();

        prop_assert_eq!(bytes.len(), SETUP_INSTRUCTION_SIZE);
        prop_assert_eq!(Instruction::decode(&bytes).unwrap(), setup);
    }

    #[test]
    fn write_roundtrip(address in any::<i64>(), data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let write = WriteInstruction::new(address, data.clone());
        let bytes = Instruction::Write(write).encode().unwrap();

        prop_assert_eq!(bytes.len(), HEADER_SIZE + data.len());
        match Instruction::decode(&bytes).unwrap() {
            Instruction::Write(decoded) => {
                prop_assert_eq!(decoded.address, address);
                prop_assert_eq!(decoded.data, data);
            }
            other => prop_assert!(false, "decoded {:?}", other),
        }
    }

    #[test]
    fn truncated_input_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
        let result = Instruction::decode(&bytes);
        prop_assert!(
            matches!(result, Err(ProtocolError::MalformedInstruction { .. })),
            "decoded {:?}",
            result
        );
    }
}

#[test]
fn setup_with_zero_blocks_roundtrips() {
    let setup = Instruction::Setup(SetupInstruction::default());
    let bytes = setup.encode().unwrap();
    assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
    assert_eq!(Instruction::decode(&bytes).unwrap(), setup);
}
