// This module is the encoder/decoder seam between the relaxation core and the instruction
// set. InsnCodec is the trait the engine and the driver talk to: encode an Insn into a
// 16-bit or 32-bit word, decode a big-endian byte slice back into an Insn, look up the
// compact equivalent of a full-width instruction and the full-width equivalent of a compact
// one, and produce architecture no-op padding for alignment frags. Nds32Codec implements
// it for the NDS32 subset modelled in insn.rs. Encodings are big-endian regardless of the
// data byte order. Branch immediates are byte displacements that must be even; the codec
// stores them as halfword counts. Symbolic operands are ignored here: the engine encodes
// with resolved (or zero) displacements and records relocations separately.

//! NDS32 instruction encoder and decoder.

use super::insn::{Insn, Opcode, Width};
use super::reg::Reg;
use crate::core::error::{RelaxError, RelaxResult};

/// An encoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    pub bits: u32,
    pub width: Width,
}

impl Encoded {
    pub fn len(&self) -> u32 {
        self.width.bytes()
    }

    /// Append the big-endian byte image.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self.width {
            Width::Compact => out.extend_from_slice(&(self.bits as u16).to_be_bytes()),
            Width::Full => out.extend_from_slice(&self.bits.to_be_bytes()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        self.write_to(&mut out);
        out
    }
}

/// Encoder/decoder collaborator of the relaxation core.
pub trait InsnCodec {
    fn encode(&self, insn: &Insn) -> RelaxResult<Encoded>;

    /// Decode the instruction at the start of `bytes`.
    fn decode(&self, bytes: &[u8]) -> RelaxResult<Insn>;

    /// Compact equivalent of a full-width instruction, if one exists for these operands.
    fn narrow(&self, insn: &Insn) -> Option<Insn>;

    /// Full-width equivalent of a compact instruction.
    fn widen(&self, insn: &Insn) -> Option<Insn>;

    /// Exactly `len` bytes of no-op padding.
    fn nop_padding(&self, len: u32) -> Vec<u8>;
}

pub const NOP32: u32 = 0x4000_0009;
pub const NOP16: u16 = 0x9200;

const OP_LWI: u32 = 0x02;
const OP_SWI: u32 = 0x0a;
const OP_MEM: u32 = 0x1c;
const OP_LSMW: u32 = 0x1d;
const OP_ALU1: u32 = 0x20;
const OP_MOVI: u32 = 0x22;
const OP_SETHI: u32 = 0x23;
const OP_JI: u32 = 0x24;
const OP_JREG: u32 = 0x25;
const OP_BR1: u32 = 0x26;
const OP_BR2: u32 = 0x27;
const OP_ADDI: u32 = 0x28;
const OP_ORI: u32 = 0x2c;

const fn br2_sub(op: Opcode) -> Option<u32> {
    Some(match op {
        Opcode::Beqz => 0x2,
        Opcode::Bnez => 0x3,
        Opcode::Bgez => 0x4,
        Opcode::Bltz => 0x5,
        Opcode::Bgtz => 0x6,
        Opcode::Blez => 0x7,
        Opcode::Bgezal => 0xc,
        Opcode::Bltzal => 0xd,
        _ => return None,
    })
}

const fn alu1_sub(op: Opcode) -> Option<u32> {
    Some(match op {
        Opcode::Add => 0,
        Opcode::Sub => 1,
        Opcode::And => 2,
        Opcode::Xor => 3,
        Opcode::Or => 4,
        _ => return None,
    })
}

fn field(r: Reg) -> u32 {
    r.num() as u32
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn signed_field(op: Opcode, value: i32, bits: u32) -> RelaxResult<u32> {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    if (value as i64) < min || (value as i64) > max {
        return Err(RelaxError::Encoding {
            opcode: op.name(),
            reason: format!("immediate {} outside [{}, {}]", value, min, max),
        });
    }
    Ok((value as u32) & ((1u32 << bits) - 1))
}

fn unsigned_field(op: Opcode, value: i32, bits: u32) -> RelaxResult<u32> {
    if value < 0 || (value as i64) >= (1i64 << bits) {
        return Err(RelaxError::Encoding {
            opcode: op.name(),
            reason: format!("immediate {} does not fit {} unsigned bits", value, bits),
        });
    }
    Ok(value as u32)
}

/// Halfword-scaled branch displacement field.
fn disp_field(op: Opcode, disp: i32, bits: u32) -> RelaxResult<u32> {
    if disp & 1 != 0 {
        return Err(RelaxError::Encoding {
            opcode: op.name(),
            reason: format!("odd branch displacement {}", disp),
        });
    }
    signed_field(op, disp >> 1, bits)
}

fn low3(op: Opcode, r: Reg) -> RelaxResult<u32> {
    if r.is_low3() {
        Ok(field(r))
    } else {
        Err(RelaxError::Encoding {
            opcode: op.name(),
            reason: format!("register {} not addressable by a 3-bit field", r),
        })
    }
}

/// Word-scaled 3-bit offset of `lwi333`/`swi333`.
fn offset3(op: Opcode, offset: i32) -> RelaxResult<u32> {
    if offset & 3 != 0 {
        return Err(RelaxError::Encoding {
            opcode: op.name(),
            reason: format!("unaligned offset {}", offset),
        });
    }
    unsigned_field(op, offset >> 2, 3)
}

fn fits_offset3(offset: i32) -> bool {
    offset & 3 == 0 && (0..8).contains(&(offset >> 2))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Nds32Codec;

impl Nds32Codec {
    pub fn new() -> Self {
        Nds32Codec
    }

    fn encode_full(&self, insn: &Insn) -> RelaxResult<u32> {
        let op = insn.op;
        let (rt, ra, rb) = (field(insn.rt), field(insn.ra), field(insn.rb));
        Ok(match op {
            Opcode::Sethi => OP_SETHI << 25 | rt << 20 | unsigned_field(op, insn.imm, 20)?,
            Opcode::Ori => OP_ORI << 25 | rt << 20 | ra << 15 | unsigned_field(op, insn.imm, 15)?,
            Opcode::Addi => OP_ADDI << 25 | rt << 20 | ra << 15 | signed_field(op, insn.imm, 15)?,
            Opcode::Movi => OP_MOVI << 25 | rt << 20 | signed_field(op, insn.imm, 20)?,
            Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
                let sub = alu1_sub(op).ok_or(RelaxError::UnclassifiableOpcode { opcode: op.name() })?;
                OP_ALU1 << 25 | rt << 20 | ra << 15 | rb << 10 | sub
            }
            Opcode::Lwi | Opcode::Swi => {
                if insn.imm & 3 != 0 {
                    return Err(RelaxError::Encoding {
                        opcode: op.name(),
                        reason: format!("unaligned offset {}", insn.imm),
                    });
                }
                let base = if op == Opcode::Lwi { OP_LWI } else { OP_SWI };
                base << 25 | rt << 20 | ra << 15 | signed_field(op, insn.imm >> 2, 15)?
            }
            Opcode::Lw => OP_MEM << 25 | rt << 20 | ra << 15 | rb << 10 | 0x02,
            Opcode::Lmw | Opcode::Smw => {
                let store = if op == Opcode::Smw { 0x20 } else { 0 };
                OP_LSMW << 25 | rt << 20 | ra << 15 | rb << 10 | store
            }
            Opcode::J | Opcode::Jal => {
                let link = if op == Opcode::Jal { 1 << 24 } else { 0 };
                OP_JI << 25 | link | disp_field(op, insn.imm, 24)?
            }
            Opcode::Jr => OP_JREG << 25 | rb << 10,
            Opcode::Ret => OP_JREG << 25 | rb << 10 | 0x20,
            Opcode::Jral => OP_JREG << 25 | rt << 20 | rb << 10 | 0x01,
            Opcode::Beq | Opcode::Bne => {
                let ne = if op == Opcode::Bne { 1 << 14 } else { 0 };
                OP_BR1 << 25 | rt << 20 | ra << 15 | ne | disp_field(op, insn.imm, 14)?
            }
            Opcode::Beqz
            | Opcode::Bnez
            | Opcode::Bgez
            | Opcode::Bltz
            | Opcode::Bgtz
            | Opcode::Blez
            | Opcode::Bgezal
            | Opcode::Bltzal => {
                let sub = br2_sub(op).ok_or(RelaxError::UnclassifiableOpcode { opcode: op.name() })?;
                OP_BR2 << 25 | rt << 20 | sub << 16 | disp_field(op, insn.imm, 16)?
            }
            Opcode::Nop => NOP32,
            _ => return Err(RelaxError::UnclassifiableOpcode { opcode: op.name() }),
        })
    }

    fn encode_compact(&self, insn: &Insn) -> RelaxResult<u32> {
        let op = insn.op;
        let bits: u32 = match op {
            Opcode::Mov55 => 0x8000 | field(insn.rt) << 5 | field(insn.ra),
            Opcode::Movi55 => 0x8400 | field(insn.rt) << 5 | signed_field(op, insn.imm, 5)?,
            Opcode::Add333 => {
                0x8c00 | low3(op, insn.rt)? << 6 | low3(op, insn.ra)? << 3 | low3(op, insn.rb)?
            }
            Opcode::Lwi333 | Opcode::Swi333 => {
                let base = if op == Opcode::Lwi333 { 0xb000 } else { 0xb400 };
                base | low3(op, insn.rt)? << 6 | low3(op, insn.ra)? << 3 | offset3(op, insn.imm)?
            }
            Opcode::J8 => 0xd500 | disp_field(op, insn.imm, 8)?,
            Opcode::Beqz38 | Opcode::Bnez38 => {
                let base = if op == Opcode::Beqz38 { 0xc000 } else { 0xc800 };
                base | low3(op, insn.rt)? << 8 | disp_field(op, insn.imm, 8)?
            }
            Opcode::Beqs38 | Opcode::Bnes38 => {
                if insn.rt == Reg::R5 {
                    return Err(RelaxError::Encoding {
                        opcode: op.name(),
                        reason: "comparand register cannot be $r5".to_string(),
                    });
                }
                let base = if op == Opcode::Beqs38 { 0xd000 } else { 0xd800 };
                base | low3(op, insn.rt)? << 8 | disp_field(op, insn.imm, 8)?
            }
            Opcode::Jr5 => 0xdd00 | field(insn.rb),
            Opcode::Jral5 => {
                if insn.rt != Reg::LP {
                    return Err(RelaxError::Encoding {
                        opcode: op.name(),
                        reason: format!("link register must be $lp, got {}", insn.rt),
                    });
                }
                0xdd20 | field(insn.rb)
            }
            Opcode::Ret5 => 0xdd80 | field(insn.rb),
            Opcode::Nop16 => NOP16 as u32,
            _ => return Err(RelaxError::UnclassifiableOpcode { opcode: op.name() }),
        };
        Ok(bits)
    }

    fn decode_compact(&self, w: u32) -> RelaxResult<Insn> {
        let r5 = |shift: u32| Reg::from_field(w >> shift);
        let r3 = |shift: u32| Reg::from_field((w >> shift) & 0x7);
        let imm8 = sign_extend(w & 0xff, 8) << 1;

        if w & 0xff00 == 0xdd00 {
            let rb = r5(0);
            return match w & 0xffe0 {
                0xdd00 => Ok(Insn::jr5(rb)),
                0xdd20 => Ok(Insn::jral5(rb)),
                0xdd80 => Ok(Insn { rb, ..Insn::new(Opcode::Ret5) }),
                _ => Err(RelaxError::Undecodable { word: w }),
            };
        }
        if w == NOP16 as u32 {
            return Ok(Insn::new(Opcode::Nop16));
        }
        let insn = match w & 0xfc00 {
            0x8000 => Insn::mov55(r5(5), r5(0)),
            0x8400 => Insn {
                rt: r5(5),
                imm: sign_extend(w & 0x1f, 5),
                ..Insn::new(Opcode::Movi55)
            },
            _ => match w & 0xfe00 {
                0x8c00 => Insn::alu(Opcode::Add333, r3(6), r3(3), r3(0)),
                0xb000 | 0xb400 => {
                    let op = if w & 0xfe00 == 0xb000 { Opcode::Lwi333 } else { Opcode::Swi333 };
                    Insn {
                        rt: r3(6),
                        ra: r3(3),
                        imm: ((w & 0x7) << 2) as i32,
                        ..Insn::new(op)
                    }
                }
                _ => {
                    if w & 0xff00 == 0xd500 {
                        return Ok(Insn { imm: imm8, ..Insn::new(Opcode::J8) });
                    }
                    let op = match w & 0xf800 {
                        0xc000 => Opcode::Beqz38,
                        0xc800 => Opcode::Bnez38,
                        0xd000 => Opcode::Beqs38,
                        0xd800 => Opcode::Bnes38,
                        _ => return Err(RelaxError::Undecodable { word: w }),
                    };
                    Insn {
                        rt: r3(8),
                        imm: imm8,
                        ..Insn::new(op)
                    }
                }
            },
        };
        Ok(insn)
    }

    fn decode_full(&self, w: u32) -> RelaxResult<Insn> {
        let rt = Reg::from_field(w >> 20);
        let ra = Reg::from_field(w >> 15);
        let rb = Reg::from_field(w >> 10);
        let undecodable = || RelaxError::Undecodable { word: w };

        let insn = match w >> 25 {
            OP_SETHI => Insn::sethi(rt, (w & 0xfffff) as i32),
            OP_ORI => Insn::ori(rt, ra, (w & 0x7fff) as i32),
            OP_ADDI => Insn::addi(rt, ra, sign_extend(w & 0x7fff, 15)),
            OP_MOVI => Insn::movi(rt, sign_extend(w & 0xfffff, 20)),
            OP_ALU1 => {
                if w == NOP32 {
                    return Ok(Insn::nop());
                }
                if w & 0x3e0 != 0 {
                    return Err(undecodable());
                }
                let op = match w & 0x1f {
                    0 => Opcode::Add,
                    1 => Opcode::Sub,
                    2 => Opcode::And,
                    3 => Opcode::Xor,
                    4 => Opcode::Or,
                    _ => return Err(undecodable()),
                };
                Insn::alu(op, rt, ra, rb)
            }
            OP_LWI => Insn::lwi(rt, ra, sign_extend(w & 0x7fff, 15) << 2),
            OP_SWI => Insn::swi(rt, ra, sign_extend(w & 0x7fff, 15) << 2),
            OP_MEM if w & 0x3ff == 0x02 => Insn::lw(rt, ra, rb),
            OP_LSMW => match w & 0x3ff {
                0x00 => Insn::lmw(rt, rb, ra),
                0x20 => Insn::smw(rt, rb, ra),
                _ => return Err(undecodable()),
            },
            OP_JI => {
                let op = if w & (1 << 24) != 0 { Opcode::Jal } else { Opcode::J };
                Insn {
                    imm: sign_extend(w & 0xff_ffff, 24) << 1,
                    ..Insn::new(op)
                }
            }
            OP_JREG => match w & 0x3ff {
                0x00 if w & 0x01f0_0000 == 0 => Insn::jr(rb),
                0x20 if w & 0x01f0_0000 == 0 => Insn { rb, ..Insn::new(Opcode::Ret) },
                0x01 => Insn { rt, rb, ..Insn::new(Opcode::Jral) },
                _ => return Err(undecodable()),
            },
            OP_BR1 => {
                let op = if w & (1 << 14) != 0 { Opcode::Bne } else { Opcode::Beq };
                Insn {
                    rt,
                    ra,
                    imm: sign_extend(w & 0x3fff, 14) << 1,
                    ..Insn::new(op)
                }
            }
            OP_BR2 => {
                let op = match (w >> 16) & 0xf {
                    0x2 => Opcode::Beqz,
                    0x3 => Opcode::Bnez,
                    0x4 => Opcode::Bgez,
                    0x5 => Opcode::Bltz,
                    0x6 => Opcode::Bgtz,
                    0x7 => Opcode::Blez,
                    0xc => Opcode::Bgezal,
                    0xd => Opcode::Bltzal,
                    _ => return Err(undecodable()),
                };
                Insn {
                    rt,
                    imm: sign_extend(w & 0xffff, 16) << 1,
                    ..Insn::new(op)
                }
            }
            _ => return Err(undecodable()),
        };
        Ok(insn)
    }
}

impl InsnCodec for Nds32Codec {
    fn encode(&self, insn: &Insn) -> RelaxResult<Encoded> {
        let width = insn.width();
        let bits = match width {
            Width::Full => self.encode_full(insn)?,
            Width::Compact => self.encode_compact(insn)?,
        };
        Ok(Encoded { bits, width })
    }

    fn decode(&self, bytes: &[u8]) -> RelaxResult<Insn> {
        let Some(&first) = bytes.first() else {
            return Err(RelaxError::Undecodable { word: 0 });
        };
        // Compact instructions have the top bit set.
        if first & 0x80 != 0 {
            match bytes {
                [hi, lo, ..] => self.decode_compact(u16::from_be_bytes([*hi, *lo]) as u32),
                _ => Err(RelaxError::Undecodable { word: first as u32 }),
            }
        } else {
            let word: [u8; 4] = bytes
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or(RelaxError::Undecodable { word: first as u32 })?;
            self.decode_full(u32::from_be_bytes(word))
        }
    }

    fn narrow(&self, insn: &Insn) -> Option<Insn> {
        if insn.sym.is_some() {
            return None;
        }
        let narrowed = match insn.op {
            Opcode::Addi if insn.imm == 0 => Insn::mov55(insn.rt, insn.ra),
            Opcode::Movi if (-16..=15).contains(&insn.imm) => Insn {
                op: Opcode::Movi55,
                ..*insn
            },
            Opcode::Add if insn.rt.is_low3() && insn.ra.is_low3() && insn.rb.is_low3() => Insn {
                op: Opcode::Add333,
                ..*insn
            },
            Opcode::Lwi | Opcode::Swi
                if insn.rt.is_low3() && insn.ra.is_low3() && fits_offset3(insn.imm) =>
            {
                let op = if insn.op == Opcode::Lwi { Opcode::Lwi333 } else { Opcode::Swi333 };
                Insn { op, ..*insn }
            }
            Opcode::Jr => Insn { op: Opcode::Jr5, ..*insn },
            Opcode::Jral if insn.rt == Reg::LP => Insn { op: Opcode::Jral5, ..*insn },
            Opcode::Ret => Insn { op: Opcode::Ret5, ..*insn },
            Opcode::Nop => Insn::new(Opcode::Nop16),
            _ => return None,
        };
        Some(narrowed)
    }

    fn widen(&self, insn: &Insn) -> Option<Insn> {
        let op = match insn.op {
            Opcode::Mov55 => return Some(Insn { sym: insn.sym, ..Insn::addi(insn.rt, insn.ra, 0) }),
            Opcode::Movi55 => Opcode::Movi,
            Opcode::Add333 => Opcode::Add,
            Opcode::Lwi333 => Opcode::Lwi,
            Opcode::Swi333 => Opcode::Swi,
            Opcode::J8 => Opcode::J,
            Opcode::Beqz38 => Opcode::Beqz,
            Opcode::Bnez38 => Opcode::Bnez,
            Opcode::Beqs38 | Opcode::Bnes38 => {
                let op = if insn.op == Opcode::Beqs38 { Opcode::Beq } else { Opcode::Bne };
                return Some(Insn {
                    op,
                    ra: Reg::R5,
                    ..*insn
                });
            }
            Opcode::Jr5 => Opcode::Jr,
            Opcode::Jral5 => Opcode::Jral,
            Opcode::Ret5 => Opcode::Ret,
            Opcode::Nop16 => return Some(Insn::nop()),
            _ => return None,
        };
        Some(Insn { op, ..*insn })
    }

    fn nop_padding(&self, len: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(len as usize);
        let mut left = len;
        if left & 1 != 0 {
            out.push(0);
            left -= 1;
        }
        if left & 2 != 0 {
            out.extend_from_slice(&NOP16.to_be_bytes());
            left -= 2;
        }
        while left >= 4 {
            out.extend_from_slice(&NOP32.to_be_bytes());
            left -= 4;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nds32::insn::SymOperand;
    use crate::core::symbols::SymbolId;

    fn r(n: u8) -> Reg {
        Reg::new(n).unwrap()
    }

    fn roundtrip(insn: Insn) -> Insn {
        let codec = Nds32Codec::new();
        let bytes = codec.encode(&insn).unwrap().to_bytes();
        codec.decode(&bytes).unwrap()
    }

    #[test]
    fn test_known_encodings() {
        let codec = Nds32Codec::new();
        assert_eq!(codec.encode(&Insn::nop()).unwrap().bits, 0x4000_0009);
        assert_eq!(codec.encode(&Insn::new(Opcode::Nop16)).unwrap().bits, 0x9200);
        assert_eq!(codec.encode(&Insn::ret()).unwrap().bits, 0x4a00_7820);
        assert_eq!(codec.encode(&Insn::jral5(r(6))).unwrap().bits, 0xdd26);
        assert_eq!(codec.encode(&Insn::sethi(Reg::TA, 0x12345)).unwrap().bits, 0x46f1_2345);
        let enc = codec.encode(&Insn::new(Opcode::J8)).unwrap();
        assert_eq!(enc.to_bytes(), vec![0xd5, 0x00]);
    }

    #[test]
    fn test_branch_displacements_roundtrip() {
        let beqz = Insn {
            rt: r(9),
            imm: -65536,
            ..Insn::new(Opcode::Beqz)
        };
        assert_eq!(roundtrip(beqz), beqz);
        let j = Insn {
            imm: 16_777_214,
            ..Insn::new(Opcode::J)
        };
        assert_eq!(roundtrip(j), j);
        let bnes = Insn {
            rt: r(3),
            imm: 254,
            ..Insn::new(Opcode::Bnes38)
        };
        assert_eq!(roundtrip(bnes), bnes);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let codec = Nds32Codec::new();
        let beq = Insn {
            imm: 16384,
            ..Insn::new(Opcode::Beq)
        };
        assert!(matches!(codec.encode(&beq), Err(RelaxError::Encoding { .. })));
        let odd = Insn {
            imm: 3,
            ..Insn::new(Opcode::J)
        };
        assert!(codec.encode(&odd).is_err());
        let bad = Insn {
            rt: Reg::R5,
            ..Insn::new(Opcode::Beqs38)
        };
        assert!(codec.encode(&bad).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = Nds32Codec::new();
        assert_eq!(
            codec.decode(&[0xdd, 0x40]),
            Err(RelaxError::Undecodable { word: 0xdd40 })
        );
        assert!(codec.decode(&[0x7e, 0, 0, 0]).is_err());
        assert!(codec.decode(&[0x46]).is_err());
    }

    #[test]
    fn test_narrow_and_widen() {
        let codec = Nds32Codec::new();
        let add = Insn::alu(Opcode::Add, r(1), r(2), r(3));
        let narrow = codec.narrow(&add).unwrap();
        assert_eq!(narrow.op, Opcode::Add333);
        assert_eq!(codec.widen(&narrow), Some(add));

        assert!(codec.narrow(&Insn::alu(Opcode::Add, r(8), r(2), r(3))).is_none());
        assert!(codec.narrow(&Insn::lwi(r(1), r(2), 32)).is_none());
        assert_eq!(codec.narrow(&Insn::lwi(r(1), r(2), 28)).unwrap().op, Opcode::Lwi333);
        assert_eq!(codec.narrow(&Insn::addi(r(9), r(20), 0)), Some(Insn::mov55(r(9), r(20))));
        assert!(codec.narrow(&Insn::addi(r(9), r(20), 4)).is_none());

        let sym = Insn::movi(r(1), 0).with_sym(SymOperand::target(SymbolId(0)));
        assert!(codec.narrow(&sym).is_none());

        let beqs = Insn {
            rt: r(2),
            ..Insn::new(Opcode::Beqs38)
        };
        let wide = codec.widen(&beqs).unwrap();
        assert_eq!((wide.op, wide.rt, wide.ra), (Opcode::Beq, r(2), Reg::R5));
    }

    #[test]
    fn test_nop_padding() {
        let codec = Nds32Codec::new();
        assert_eq!(codec.nop_padding(2), vec![0x92, 0x00]);
        assert_eq!(codec.nop_padding(4), vec![0x40, 0x00, 0x00, 0x09]);
        assert_eq!(codec.nop_padding(6), vec![0x92, 0x00, 0x40, 0x00, 0x00, 0x09]);
        assert_eq!(codec.nop_padding(3), vec![0x00, 0x92, 0x00]);
        assert!(codec.nop_padding(0).is_empty());
    }
}
