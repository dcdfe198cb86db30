//! RV32I (+M) instruction encoding.
//!
//! One function per machine instruction, each returning the 32-bit word.
//! Only the instructions the emitter actually produces are here; the
//! four encoding formats cover them all.
//!
//! Addresses and large constants are materialized as a `lui`/`addi` pair:
//! `lui(rd, hi(x))` followed by `addi(rd, rd, lo(x))` reconstructs `x`
//! exactly, because [hi] pre-biases the value by 0x800 to cancel the sign
//! extension of the low half.

use derive_more::Display;

/// Registers of the RV32 integer file, in architectural order.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum Reg {
    #[display("zero")]
    Zero,
    #[display("ra")]
    Ra,
    #[display("sp")]
    Sp,
    #[display("gp")]
    Gp,
    #[display("tp")]
    Tp,
    #[display("t0")]
    T0,
    #[display("t1")]
    T1,
    #[display("t2")]
    T2,
    #[display("s0")]
    S0,
    #[display("s1")]
    S1,
    #[display("a0")]
    A0,
    #[display("a1")]
    A1,
    #[display("a2")]
    A2,
    #[display("a3")]
    A3,
    #[display("a4")]
    A4,
    #[display("a5")]
    A5,
    #[display("a6")]
    A6,
    #[display("a7")]
    A7,
    #[display("s2")]
    S2,
    #[display("s3")]
    S3,
    #[display("s4")]
    S4,
    #[display("s5")]
    S5,
    #[display("s6")]
    S6,
    #[display("s7")]
    S7,
    #[display("s8")]
    S8,
    #[display("s9")]
    S9,
    #[display("s10")]
    S10,
    #[display("s11")]
    S11,
    #[display("t3")]
    T3,
    #[display("t4")]
    T4,
    #[display("t5")]
    T5,
    #[display("t6")]
    T6,
}

impl Reg {
    pub const fn num(self) -> u32 {
        self as u32
    }

    /// Machine register backing a Phase-2 register slot: slot `n` maps to
    /// `x(10 + n)`, so slots 0..8 are a0..a7 and the reserved indirect-call
    /// slot 21 is t6.
    pub fn from_slot(slot: i32) -> Option<Reg> {
        use Reg::*;
        match slot {
            0 => Some(A0),
            1 => Some(A1),
            2 => Some(A2),
            3 => Some(A3),
            4 => Some(A4),
            5 => Some(A5),
            6 => Some(A6),
            7 => Some(A7),
            21 => Some(T6),
            _ => None,
        }
    }
}

/// Does `imm` fit the signed 12-bit immediate of the I/S formats?
pub const fn fits_imm12(imm: i32) -> bool {
    imm >= -2048 && imm <= 2047
}

/// Upper half for a `lui`/`addi` pair; biased so the pair reconstructs the
/// value after the low half sign-extends.
pub const fn hi(imm: i32) -> i32 {
    imm.wrapping_add(0x800)
}

/// Sign-extended low 12 bits for the `addi` of a `lui`/`addi` pair.
pub const fn lo(imm: i32) -> i32 {
    (imm << 20) >> 20
}

const fn r_type(funct7: u32, rs2: Reg, rs1: Reg, funct3: u32, rd: Reg, opcode: u32) -> u32 {
    (funct7 << 25)
        | (rs2.num() << 20)
        | (rs1.num() << 15)
        | (funct3 << 12)
        | (rd.num() << 7)
        | opcode
}

const fn i_type(imm: i32, rs1: Reg, funct3: u32, rd: Reg, opcode: u32) -> u32 {
    ((imm as u32 & 0xfff) << 20) | (rs1.num() << 15) | (funct3 << 12) | (rd.num() << 7) | opcode
}

const fn s_type(imm: i32, rs2: Reg, rs1: Reg, funct3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5 & 0x7f) << 25)
        | (rs2.num() << 20)
        | (rs1.num() << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | 0x23
}

const fn b_type(imm: i32, rs2: Reg, rs1: Reg, funct3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 12 & 0x1) << 31)
        | ((imm >> 5 & 0x3f) << 25)
        | (rs2.num() << 20)
        | (rs1.num() << 15)
        | (funct3 << 12)
        | ((imm >> 1 & 0xf) << 8)
        | ((imm >> 11 & 0x1) << 7)
        | 0x63
}

/// `rd = imm & 0xfffff000`.
pub const fn lui(rd: Reg, imm: i32) -> u32 {
    (imm as u32 & 0xffff_f000) | (rd.num() << 7) | 0x37
}

pub const fn addi(rd: Reg, rs1: Reg, imm: i32) -> u32 {
    i_type(imm, rs1, 0x0, rd, 0x13)
}

pub const fn xori(rd: Reg, rs1: Reg, imm: i32) -> u32 {
    i_type(imm, rs1, 0x4, rd, 0x13)
}

/// Load word from `rs1 + imm`.
pub const fn lw(rd: Reg, rs1: Reg, imm: i32) -> u32 {
    i_type(imm, rs1, 0x2, rd, 0x03)
}

/// Load byte (sign-extending) from `rs1 + imm`.
pub const fn lb(rd: Reg, rs1: Reg, imm: i32) -> u32 {
    i_type(imm, rs1, 0x0, rd, 0x03)
}

/// Store word `rs2` to `rs1 + imm`.
pub const fn sw(rs2: Reg, rs1: Reg, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0x2)
}

/// Store byte `rs2` to `rs1 + imm`.
pub const fn sb(rs2: Reg, rs1: Reg, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0x0)
}

pub const fn add(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x0, rd, 0x33)
}

pub const fn sub(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x20, rs2, rs1, 0x0, rd, 0x33)
}

pub const fn mul(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x01, rs2, rs1, 0x0, rd, 0x33)
}

/// Signed division.
pub const fn div(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x01, rs2, rs1, 0x4, rd, 0x33)
}

/// Signed remainder.
pub const fn rem(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x01, rs2, rs1, 0x6, rd, 0x33)
}

pub const fn and(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x7, rd, 0x33)
}

pub const fn or(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x6, rd, 0x33)
}

pub const fn xor(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x4, rd, 0x33)
}

/// Shift left logical.
pub const fn sll(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x1, rd, 0x33)
}

/// Shift right arithmetic.
pub const fn sra(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x20, rs2, rs1, 0x5, rd, 0x33)
}

/// Set if less than, signed.
pub const fn slt(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x2, rd, 0x33)
}

/// Set if less than, unsigned.
pub const fn sltu(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(0x00, rs2, rs1, 0x3, rd, 0x33)
}

/// Branch if equal, pc-relative.
pub const fn beq(rs1: Reg, rs2: Reg, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0x0)
}

/// Branch if not equal, pc-relative.
pub const fn bne(rs1: Reg, rs2: Reg, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0x1)
}

/// Jump and link, pc-relative.
pub const fn jal(rd: Reg, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm >> 20 & 0x1) << 31)
        | ((imm >> 1 & 0x3ff) << 21)
        | ((imm >> 11 & 0x1) << 20)
        | ((imm >> 12 & 0xff) << 12)
        | (rd.num() << 7)
        | 0x6f
}

/// Jump and link through `rs1 + imm`.
pub const fn jalr(rd: Reg, rs1: Reg, imm: i32) -> u32 {
    i_type(imm, rs1, 0x0, rd, 0x67)
}

pub const fn ecall() -> u32 {
    0x0000_0073
}

#[cfg(test)]
mod tests {
    use super::*;
    use Reg::*;

    // Golden words checked against an independent assembler.
    #[test]
    fn golden_encodings() {
        assert_eq!(addi(A0, Zero, 0), 0x0000_0513); // li a0, 0
        assert_eq!(jalr(Zero, Ra, 0), 0x0000_8067); // ret
        assert_eq!(ecall(), 0x0000_0073);
        assert_eq!(lui(A0, 0x1000), 0x0000_1537);
        assert_eq!(add(A0, A1, A2), 0x00c5_8533);
        assert_eq!(sub(A0, A1, A2), 0x40c5_8533);
        assert_eq!(mul(A0, A1, A2), 0x02c5_8533);
        assert_eq!(sw(A0, Sp, 8), 0x00a1_2423);
        assert_eq!(lw(A0, Sp, 8), 0x0081_2503);
        assert_eq!(beq(Zero, Zero, 8), 0x0000_0463);
        assert_eq!(jal(Zero, 8), 0x0080_006f);
        assert_eq!(xori(A0, A0, 1), 0x0015_4513);
        assert_eq!(sltu(A0, Zero, A0), 0x00a0_3533);
    }

    #[test]
    fn hi_lo_reconstruct() {
        for value in [0, 1, -1, 2047, 2048, -2048, -2049, 0x12345_fff_u32 as i32, 0x10054] {
            let upper = (hi(value) as u32 & 0xffff_f000) as i32;
            assert_eq!(upper.wrapping_add(lo(value)), value, "value {value:#x}");
        }
    }

    #[test]
    fn imm12_boundaries() {
        assert!(fits_imm12(2047));
        assert!(fits_imm12(-2048));
        assert!(!fits_imm12(2048));
        assert!(!fits_imm12(-2049));
    }

    #[test]
    fn slot_mapping() {
        assert_eq!(Reg::from_slot(0), Some(A0));
        assert_eq!(Reg::from_slot(7), Some(A7));
        assert_eq!(Reg::from_slot(21), Some(T6));
        assert_eq!(Reg::from_slot(8), None);
    }
}
