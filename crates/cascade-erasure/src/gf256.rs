//! GF(2^8) arithmetic over the Reed-Solomon polynomial 0x11D.
//!
//! All field math goes through a process-wide table set built once behind a
//! [`OnceLock`]. The polynomial, the generator and the table layout are part
//! of the wire contract — the coefficient a receiver derives for a chunk id
//! must equal the sender's bit for bit.

use std::sync::OnceLock;

/// The irreducible polynomial: x^8 + x^4 + x^3 + x^2 + 1.
const POLY: u16 = 0x11D;

/// Multiplicative generator of the field under [`POLY`].
const GENERATOR: u8 = 2;

static TABLES: OnceLock<Gf256> = OnceLock::new();

/// Process-wide GF(2^8) tables.
///
/// `exp` is doubled so `exp[log a + log b]` never wraps; `mul` is the full
/// 256x256 product table so the hot slice kernels pay one lookup per byte.
pub struct Gf256 {
    exp: [u8; 512],
    log: [u8; 256],
    inv: [u8; 256],
    mul: Box<[[u8; 256]]>,
}

/// The shared tables, built on first use.
pub fn tables() -> &'static Gf256 {
    TABLES.get_or_init(Gf256::build)
}

impl Gf256 {
    fn build() -> Gf256 {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];

        let mut value: u16 = 1;
        for i in 0..255 {
            exp[i] = value as u8;
            log[value as usize] = i as u8;
            value *= u16::from(GENERATOR);
            if value & 0x100 != 0 {
                value ^= POLY;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }

        let mut inv = [0u8; 256];
        for a in 1..256 {
            inv[a] = exp[255 - log[a] as usize];
        }

        let mut mul = vec![[0u8; 256]; 256].into_boxed_slice();
        for a in 1..256 {
            for b in 1..256 {
                mul[a][b] = exp[log[a] as usize + log[b] as usize];
            }
        }

        Gf256 { exp, log, inv, mul }
    }

    /// Field product `a * b`.
    #[inline]
    pub fn mul(&self, a: u8, b: u8) -> u8 {
        self.mul[a as usize][b as usize]
    }

    /// Multiplicative inverse of a nonzero element.
    #[inline]
    pub fn inv(&self, a: u8) -> u8 {
        debug_assert_ne!(a, 0, "zero has no inverse");
        self.inv[a as usize]
    }

    /// Field quotient `a / b` for nonzero `b`.
    #[inline]
    pub fn div(&self, a: u8, b: u8) -> u8 {
        self.mul(a, self.inv(b))
    }

    /// `dst[i] ^= c * src[i]` over whole slices.
    ///
    /// The coefficient-1 case degenerates to a plain XOR and skips the table.
    pub fn mul_acc_slice(&self, dst: &mut [u8], src: &[u8], c: u8) {
        debug_assert_eq!(dst.len(), src.len());
        match c {
            0 => {}
            1 => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d ^= *s;
                }
            }
            _ => {
                let row = &self.mul[c as usize];
                for (d, s) in dst.iter_mut().zip(src) {
                    *d ^= row[*s as usize];
                }
            }
        }
    }

    /// `dst[i] = c * dst[i]` in place.
    pub fn mul_slice(&self, dst: &mut [u8], c: u8) {
        match c {
            0 => dst.fill(0),
            1 => {}
            _ => {
                let row = &self.mul[c as usize];
                for d in dst.iter_mut() {
                    *d = row[*d as usize];
                }
            }
        }
    }
}
