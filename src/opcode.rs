use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

macro_rules! opcodes {
    ( $( $( #[doc = $doc:expr] )* $name:ident = $value:literal / $bytes:literal , )+ ) => {
        /// One instruction + addressing-mode variant of the machine.
        ///
        /// The integer values form the wire format and must never be
        /// renumbered: existing program fixtures depend on them.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(TryFromPrimitive, IntoPrimitive)]
        pub enum Opcode {
            $(
                $( #[doc = $doc] )*
                $name = $value,
            )+
        }

        impl Opcode {
            pub const ALL: &'static [Self] = &[
                $( Self::$name, )+
            ];

            /// Number of operand bytes following the opcode byte.
            ///
            /// Fixed per opcode; the encoder and decoder both rely on it,
            /// there are no prefixes or variable-length forms.
            pub const fn operand_bytes(self) -> usize {
                match self {
                    $( Self::$name => $bytes, )+
                }
            }

            /// Total encoded length, opcode byte included.
            pub const fn encoded_len(self) -> usize {
                1 + self.operand_bytes()
            }
        }

        impl fmt::Display for Opcode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( Self::$name => f.write_str(stringify!($name)), )+
                }
            }
        }
    }
}

opcodes! {
    /// Halt execution.
    Hlt = 0 / 0,

    // MOV family
    /// MOV reg, byte
    MovNumToReg = 1 / 2,
    /// MOV reg, reg
    MovRegToReg = 2 / 2,
    /// MOV reg, [addr]
    MovAddrToReg = 3 / 2,
    /// MOV reg, [reg]
    MovRegAddrToReg = 4 / 2,
    /// MOV reg, [SP+offset]
    MovStackOffsToReg = 5 / 2,
    /// MOV [addr], byte
    MovNumToAddr = 6 / 2,
    /// MOV [addr], reg
    MovRegToAddr = 7 / 2,
    /// MOV [reg], byte
    MovNumToRegAddr = 8 / 2,
    /// MOV [reg], reg
    MovRegToRegAddr = 9 / 2,
    /// MOV [SP+offset], reg
    MovRegToStackOffs = 10 / 2,

    // Arithmetic
    AddNumToReg = 11 / 2,
    AddRegToReg = 12 / 2,
    AddAddrToReg = 13 / 2,
    AddRegAddrToReg = 14 / 2,
    SubNumFromReg = 15 / 2,
    SubRegFromReg = 16 / 2,
    SubAddrFromReg = 17 / 2,
    SubRegAddrFromReg = 18 / 2,
    IncReg = 19 / 1,
    DecReg = 20 / 1,
    NegReg = 21 / 1,

    // Comparison (SUB without the store)
    CmpNumWithReg = 22 / 2,
    CmpRegWithReg = 23 / 2,
    CmpAddrWithReg = 24 / 2,
    CmpRegAddrWithReg = 25 / 2,

    // Control flow
    JmpAddr = 26 / 1,
    JmpRegAddr = 27 / 1,
    JcAddr = 28 / 1,
    JcRegAddr = 29 / 1,
    JncAddr = 30 / 1,
    JncRegAddr = 31 / 1,
    JzAddr = 32 / 1,
    JzRegAddr = 33 / 1,
    JnzAddr = 34 / 1,
    JnzRegAddr = 35 / 1,
    JaAddr = 36 / 1,
    JaRegAddr = 37 / 1,
    JnaAddr = 38 / 1,
    JnaRegAddr = 39 / 1,
    JsAddr = 40 / 1,
    JsRegAddr = 41 / 1,
    JnsAddr = 42 / 1,
    JnsRegAddr = 43 / 1,

    // Stack
    PushNum = 44 / 1,
    PushReg = 45 / 1,
    PushAddr = 46 / 1,
    PushRegAddr = 47 / 1,
    PopReg = 48 / 1,
    Pushf = 49 / 0,
    Popf = 50 / 0,

    // Subroutines
    CallAddr = 51 / 1,
    CallRegAddr = 52 / 1,
    Ret = 53 / 0,

    // Multiplication and division
    MulNumToReg = 54 / 2,
    MulRegToReg = 55 / 2,
    MulAddrToReg = 56 / 2,
    MulRegAddrToReg = 57 / 2,
    DivNumFromReg = 58 / 2,
    DivRegFromReg = 59 / 2,
    DivAddrFromReg = 60 / 2,
    DivRegAddrFromReg = 61 / 2,

    // Logic
    AndNumWithReg = 62 / 2,
    AndRegWithReg = 63 / 2,
    AndAddrWithReg = 64 / 2,
    AndRegAddrWithReg = 65 / 2,
    OrNumWithReg = 66 / 2,
    OrRegWithReg = 67 / 2,
    OrAddrWithReg = 68 / 2,
    OrRegAddrWithReg = 69 / 2,
    XorNumWithReg = 70 / 2,
    XorRegWithReg = 71 / 2,
    XorAddrWithReg = 72 / 2,
    XorRegAddrWithReg = 73 / 2,
    NotReg = 74 / 1,

    // Shifts
    ShlNumWithReg = 75 / 2,
    ShlRegWithReg = 76 / 2,
    ShlAddrWithReg = 77 / 2,
    ShlRegAddrWithReg = 78 / 2,
    ShrNumWithReg = 79 / 2,
    ShrRegWithReg = 80 / 2,
    ShrAddrWithReg = 81 / 2,
    ShrRegAddrWithReg = 82 / 2,

    // Port I/O, immediate port number
    OutImm = 83 / 1,
    InImm = 84 / 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_dense_and_stable() {
        assert_eq!(Opcode::ALL.len(), 85);
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(u8::from(*op) as usize, i);
            assert_eq!(Opcode::try_from(i as u8).unwrap(), *op);
        }
    }

    #[test]
    fn out_of_table_bytes_are_rejected() {
        for byte in 85..=255u8 {
            assert!(Opcode::try_from(byte).is_err());
        }
    }

    #[test]
    fn fixture_compatibility_spot_checks() {
        assert_eq!(u8::from(Opcode::Hlt), 0);
        assert_eq!(u8::from(Opcode::MovNumToReg), 1);
        assert_eq!(u8::from(Opcode::MovRegToStackOffs), 10);
        assert_eq!(u8::from(Opcode::IncReg), 19);
        assert_eq!(u8::from(Opcode::JmpAddr), 26);
        assert_eq!(u8::from(Opcode::JnsRegAddr), 43);
        assert_eq!(u8::from(Opcode::PushNum), 44);
        assert_eq!(u8::from(Opcode::Ret), 53);
        assert_eq!(u8::from(Opcode::MulNumToReg), 54);
        assert_eq!(u8::from(Opcode::NotReg), 74);
        assert_eq!(u8::from(Opcode::ShrRegAddrWithReg), 82);
        assert_eq!(u8::from(Opcode::InImm), 84);
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Opcode::Hlt.operand_bytes(), 0);
        assert_eq!(Opcode::Ret.operand_bytes(), 0);
        assert_eq!(Opcode::Pushf.operand_bytes(), 0);
        assert_eq!(Opcode::Popf.operand_bytes(), 0);
        assert_eq!(Opcode::IncReg.operand_bytes(), 1);
        assert_eq!(Opcode::JmpAddr.operand_bytes(), 1);
        assert_eq!(Opcode::OutImm.operand_bytes(), 1);
        assert_eq!(Opcode::MovNumToReg.operand_bytes(), 2);
        assert_eq!(Opcode::ShlNumWithReg.operand_bytes(), 2);
        assert_eq!(Opcode::MovNumToReg.encoded_len(), 3);

        // Everything is 0, 1 or 2 operand bytes, nothing self-describing.
        for op in Opcode::ALL {
            assert!(op.operand_bytes() <= 2);
        }
    }
}
