//! Instruction decoding and control-flow classification.

use iced_x86::{Decoder, DecoderOptions, Formatter, GasFormatter};

use crate::DecodeError;

/// Instruction texts that mark a byte sequence as not really code.
/// `"(bad)"` is the formatter's rendering of an undecodable sequence;
/// `"ss"` and `"gs"` are stray segment-prefix bytes decoded alone.
const UNACCEPTABLE_TEXTS: [&str; 3] = ["(bad)", "ss", "gs"];

/// Prefix bytes skipped once when classifying: branch hints
/// (`0x2e`/`0x3e`) and operand/address size overrides (`0x66`/`0x67`).
fn is_skippable_prefix(byte: u8) -> bool {
    matches!(byte, 0x2e | 0x3e | 0x66 | 0x67)
}

/// Control-flow kind of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnKind {
    Misc,
    Call,
    Jump,
    CondJump,
    Ret,
}

/// One decoded instruction, reduced to what tracing needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Total byte length, prefix included.
    pub size: usize,
    /// Trimmed, lower-cased textual form.
    pub text: String,
    /// Control-flow classification.
    pub kind: InsnKind,
    /// Static branch target; 0 means "no static target".
    pub target: u32,
}

impl Insn {
    /// Returns false for byte sequences the analyser must reinterpret
    /// as data.
    pub fn is_acceptable(&self) -> bool {
        !UNACCEPTABLE_TEXTS.contains(&self.text.as_str())
    }
}

/// Classifier over 32-bit x86 byte streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Decodes one instruction at `address` from `bytes`.
    ///
    /// `bytes` must not run past the range the caller wants decoded;
    /// an instruction that would cross the end comes back undecodable
    /// rather than truncated.
    pub fn decode(&self, address: u32, bytes: &[u8]) -> Result<Insn, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty(address));
        }

        // A hinted or size-prefixed near branch keeps its 32-bit
        // displacement; decode past the prefix so the operand-size
        // override cannot reinterpret the displacement width.
        let prefix_len = usize::from(
            is_skippable_prefix(bytes[0]) && bytes.len() > 1 && starts_branch(&bytes[1..]),
        );

        let mut decoder = Decoder::with_ip(
            32,
            &bytes[prefix_len..],
            (address as u64) + prefix_len as u64,
            DecoderOptions::NONE,
        );
        let instruction = decoder.decode();
        let consumed = decoder.position();
        if consumed == 0 {
            return Err(DecodeError::Stalled(address));
        }

        let mut text = String::new();
        GasFormatter::new().format(&instruction, &mut text);
        let text = text.trim().to_ascii_lowercase();

        let mut insn = Insn {
            size: prefix_len + consumed,
            text,
            kind: InsnKind::Misc,
            target: 0,
        };

        // Undecodable sequences carry no classification; the caller
        // re-checks the text and acts on it.
        if instruction.is_invalid() {
            return Ok(insn);
        }

        classify(address, bytes, &mut insn);
        Ok(insn)
    }
}

/// Returns true if `bytes` begin a relative branch opcode.
fn starts_branch(bytes: &[u8]) -> bool {
    match bytes[0] {
        0x0f => bytes.len() > 1 && (0x80..=0x8f).contains(&bytes[1]),
        0x70..=0x7f | 0xe0..=0xe3 | 0xe8..=0xeb => true,
        _ => false,
    }
}

/// Sets the control-flow kind from the leading opcode bytes and, for
/// direct branches, the target from the trailing displacement.
fn classify(address: u32, bytes: &[u8], insn: &mut Insn) {
    let mut data0 = bytes[0];
    let mut data1 = 0u8;

    if is_skippable_prefix(data0) {
        if insn.size > 1 {
            data0 = bytes[1];
        }
        if insn.size > 2 {
            data1 = bytes[2];
        }
    } else if insn.size > 1 {
        data1 = bytes[1];
    }

    let mut have_target = true;
    insn.kind = match data0 {
        // Jcc rel16/32 (jump near conditional).
        0x0f if (0x80..=0x8f).contains(&data1) => InsnKind::CondJump,
        // Jcc rel8 (jump short conditional).
        0x70..=0x7f => InsnKind::CondJump,
        // LOOPNE/LOOPE/LOOP rel8.
        0xe0..=0xe2 => InsnKind::CondJump,
        // JCXZ/JECXZ rel8.
        0xe3 => InsnKind::CondJump,
        // CALL rel16/32.
        0xe8 => InsnKind::Call,
        // JMP rel16/32, JMP ptr16:32, JMP rel8.
        0xe9 | 0xea | 0xeb => InsnKind::Jump,
        // RETN imm/none, RETF imm/none, IRET.
        0xc2 | 0xc3 | 0xca | 0xcb | 0xcf => InsnKind::Ret,
        // CALL/JMP r/m: the ModR/M reg field picks the operation and
        // the target is indirect.
        0xff => {
            have_target = false;
            match (data1 >> 3) & 7 {
                2 | 3 => InsnKind::Call,
                4 | 5 => InsnKind::Jump,
                _ => InsnKind::Misc,
            }
        }
        _ => InsnKind::Misc,
    };

    if have_target
        && matches!(insn.kind, InsnKind::Call | InsnKind::Jump | InsnKind::CondJump)
    {
        let displacement = if insn.size < 5 {
            bytes[insn.size - 1] as i8 as i32
        } else {
            i32::from_le_bytes(
                bytes[insn.size - 4..insn.size]
                    .try_into()
                    .expect("4-byte displacement slice"),
            )
        };
        insn.target = address
            .wrapping_add(insn.size as u32)
            .wrapping_add(displacement as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(address: u32, bytes: &[u8]) -> Insn {
        Classifier::new().decode(address, bytes).unwrap()
    }

    #[test]
    fn call_rel32() {
        let insn = decode(0x1000, &[0xe8, 0x05, 0x00, 0x00, 0x00]);
        assert_eq!(insn.size, 5);
        assert_eq!(insn.kind, InsnKind::Call);
        assert_eq!(insn.target, 0x100a);
        assert!(insn.is_acceptable());
    }

    #[test]
    fn short_jump_to_self() {
        let insn = decode(0x1000, &[0xeb, 0xfe]);
        assert_eq!(insn.size, 2);
        assert_eq!(insn.kind, InsnKind::Jump);
        assert_eq!(insn.target, 0x1000);
    }

    #[test]
    fn prefixed_near_conditional_keeps_rel32() {
        let insn = decode(0x2000, &[0x66, 0x0f, 0x84, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(insn.size, 7);
        assert_eq!(insn.kind, InsnKind::CondJump);
        assert_eq!(insn.target, 0x2017);
    }

    #[test]
    fn branch_hint_prefix_is_skipped_for_classification() {
        // 3e = taken hint on jcc.
        let insn = decode(0x3000, &[0x3e, 0x0f, 0x85, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(insn.size, 7);
        assert_eq!(insn.kind, InsnKind::CondJump);
        assert_eq!(insn.target, 0x3107);
    }

    #[test]
    fn short_conditional_jump() {
        let insn = decode(0x1000, &[0x74, 0x10]);
        assert_eq!(insn.size, 2);
        assert_eq!(insn.kind, InsnKind::CondJump);
        assert_eq!(insn.target, 0x1012);
    }

    #[test]
    fn loop_and_jecxz_are_conditional() {
        assert_eq!(decode(0x1000, &[0xe2, 0xfc]).kind, InsnKind::CondJump);
        assert_eq!(decode(0x1000, &[0xe3, 0x02]).kind, InsnKind::CondJump);
    }

    #[test]
    fn ret_family() {
        assert_eq!(decode(0x1000, &[0xc3]).kind, InsnKind::Ret);
        assert_eq!(decode(0x1000, &[0xc2, 0x08, 0x00]).kind, InsnKind::Ret);
        assert_eq!(decode(0x1000, &[0xcb]).kind, InsnKind::Ret);
        assert_eq!(decode(0x1000, &[0xcf]).kind, InsnKind::Ret);
        assert_eq!(decode(0x1000, &[0xc3]).target, 0);
    }

    #[test]
    fn indirect_call_and_jump_have_no_target() {
        // call *%eax
        let insn = decode(0x1000, &[0xff, 0xd0]);
        assert_eq!(insn.kind, InsnKind::Call);
        assert_eq!(insn.target, 0);

        // jmp *%eax
        let insn = decode(0x1000, &[0xff, 0xe0]);
        assert_eq!(insn.kind, InsnKind::Jump);
        assert_eq!(insn.target, 0);

        // push (%eax): reg field 6, plain instruction.
        let insn = decode(0x1000, &[0xff, 0x30]);
        assert_eq!(insn.kind, InsnKind::Misc);
    }

    #[test]
    fn plain_instructions_are_misc() {
        let insn = decode(0x1000, &[0x90]);
        assert_eq!(insn.kind, InsnKind::Misc);
        assert_eq!(insn.size, 1);
        assert_eq!(insn.text, "nop");
    }

    #[test]
    fn undecodable_bytes_are_unacceptable() {
        // A lone two-byte-opcode escape cannot decode.
        let insn = decode(0x1000, &[0x0f]);
        assert!(!insn.is_acceptable());
        assert_eq!(insn.text, "(bad)");
    }

    #[test]
    fn truncated_branch_is_unacceptable_not_an_error() {
        // e8 needs four displacement bytes; only one is available.
        let insn = decode(0x1000, &[0xe8, 0x01]);
        assert!(!insn.is_acceptable());
    }

    #[test]
    fn empty_input_is_a_hard_error() {
        assert_eq!(
            Classifier::new().decode(0x1000, &[]),
            Err(DecodeError::Empty(0x1000))
        );
    }
}
