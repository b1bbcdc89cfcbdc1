//! The RSA trapdoor permutation that chains search tokens together.
//!
//! Anyone holding the public key can walk a token *forwards* (`eval`), but
//! only the trapdoor holder can step *backwards* (`invert`). The client
//! inverts once per update, so consecutive update tokens for a keyword look
//! unrelated to the server; a search hands over the newest token and lets
//! the much cheaper forward direction recover the full history.
//!
//! Forward evaluation is `x^e mod n` with the usual `e = 65537`; inversion
//! is `x^d mod n`, done CRT-style on the prime factors because a full-width
//! private exponentiation is orders of magnitude slower than `eval` and the
//! client pays it on every update.

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use crate::token::{SearchToken, SEARCH_TOKEN_SIZE};
use crate::Error;

/// Modulus width generated by [`TdpInverse::generate`].
pub const MODULUS_BITS: u64 = 2048;

/// The public RSA exponent.
const PUBLIC_EXPONENT: u32 = 65537;

/// Miller-Rabin rounds used during key generation.
const PRIMALITY_ROUNDS: usize = 32;

const PUBLIC_KEY_MAGIC: &[u8; 4] = b"SXPK";
const PRIVATE_KEY_MAGIC: &[u8; 4] = b"SXSK";

/// The public half of the permutation: forward evaluation only.
#[derive(Clone)]
pub struct Tdp {
    n: BigUint,
    e: BigUint,
}

impl Tdp {
    /// Reconstruct the public half from a key blob produced by
    /// [`Tdp::public_key`] or [`TdpInverse::public_key`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::KeyMaterial`] if the blob is malformed or the
    /// modulus does not fit the search-token domain.
    pub fn from_public_key(blob: &[u8]) -> Result<Self, Error> {
        let mut fields = BlobReader::new(blob, PUBLIC_KEY_MAGIC)?;
        let n = fields.field()?;
        let e = fields.field()?;
        fields.finish()?;

        check_modulus(&n)?;
        Ok(Tdp { n, e })
    }

    /// Serialise the public key.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        let mut blob = Vec::from(*PUBLIC_KEY_MAGIC);
        push_field(&mut blob, &self.n);
        push_field(&mut blob, &self.e);
        blob
    }

    /// One forward step of the permutation.
    #[must_use]
    pub fn eval(&self, token: &SearchToken) -> SearchToken {
        let x = BigUint::from_bytes_be(token.as_bytes());
        into_token(&x.modpow(&self.e, &self.n))
    }

    /// `k` forward steps of the permutation.
    ///
    /// Collapsing the steps into a single exponentiation would need the
    /// group order, which only the trapdoor holder knows, so the public
    /// side iterates.
    #[must_use]
    pub fn eval_pow(&self, token: &SearchToken, k: u32) -> SearchToken {
        let mut x = BigUint::from_bytes_be(token.as_bytes());
        for _ in 0..k {
            x = x.modpow(&self.e, &self.n);
        }
        into_token(&x)
    }
}

impl fmt::Debug for Tdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tdp")
            .field("modulus_bits", &self.n.bits())
            .finish()
    }
}

/// The trapdoor half: can step the permutation backwards.
pub struct TdpInverse {
    n: BigUint,
    e: BigUint,
    d: BigUint,
    p: BigUint,
    q: BigUint,
    // CRT precomputation
    d_p: BigUint,
    d_q: BigUint,
    q_inv: BigUint,
}

impl TdpInverse {
    /// Generate a fresh keypair with a [`MODULUS_BITS`]-bit modulus.
    ///
    /// # Errors
    ///
    /// Key generation itself cannot fail; the `Result` mirrors
    /// [`TdpInverse::generate_with_modulus_bits`].
    pub fn generate() -> Result<Self, Error> {
        Self::generate_with_modulus_bits(MODULUS_BITS)
    }

    /// Generate a keypair with a chosen modulus width.
    ///
    /// Anything below 2048 bits is not a serious permutation; smaller widths
    /// exist so tests can afford thousands of inversions.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::KeyMaterial`] if `bits` is odd, too small to host
    /// the token derivation, or wider than the search-token domain.
    pub fn generate_with_modulus_bits(bits: u64) -> Result<Self, Error> {
        if bits % 2 != 0 || !(512..=SEARCH_TOKEN_SIZE as u64 * 8).contains(&bits) {
            return Err(Error::KeyMaterial(format!(
                "unsupported modulus width: {bits} bits"
            )));
        }

        let mut rng = OsRng;
        let e = BigUint::from(PUBLIC_EXPONENT);

        loop {
            let p = generate_prime(bits / 2, &e, &mut rng);
            let q = generate_prime(bits / 2, &e, &mut rng);
            if p == q {
                continue;
            }

            let phi = (&p - 1u32) * (&q - 1u32);
            let d = match modular_inverse(&e, &phi) {
                Some(d) => d,
                None => continue,
            };
            let q_inv = match modular_inverse(&q, &p) {
                Some(inv) => inv,
                None => continue,
            };

            let d_p = &d % (&p - 1u32);
            let d_q = &d % (&q - 1u32);

            return Ok(TdpInverse {
                n: &p * &q,
                e,
                d,
                p,
                q,
                d_p,
                d_q,
                q_inv,
            });
        }
    }

    /// Reconstruct the trapdoor from a key blob produced by
    /// [`TdpInverse::private_key`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::KeyMaterial`] if the blob is malformed or
    /// internally inconsistent.
    pub fn from_private_key(blob: &[u8]) -> Result<Self, Error> {
        let mut fields = BlobReader::new(blob, PRIVATE_KEY_MAGIC)?;
        let n = fields.field()?;
        let e = fields.field()?;
        let d = fields.field()?;
        let p = fields.field()?;
        let q = fields.field()?;
        fields.finish()?;

        check_modulus(&n)?;
        if &p * &q != n {
            return Err(Error::KeyMaterial(
                "modulus does not match its factors".to_string(),
            ));
        }

        let q_inv = modular_inverse(&q, &p)
            .ok_or_else(|| Error::KeyMaterial("factors are not coprime".to_string()))?;
        let d_p = &d % (&p - 1u32);
        let d_q = &d % (&q - 1u32);

        Ok(TdpInverse {
            n,
            e,
            d,
            p,
            q,
            d_p,
            d_q,
            q_inv,
        })
    }

    /// Serialise the trapdoor key.
    #[must_use]
    pub fn private_key(&self) -> Vec<u8> {
        let mut blob = Vec::from(*PRIVATE_KEY_MAGIC);
        push_field(&mut blob, &self.n);
        push_field(&mut blob, &self.e);
        push_field(&mut blob, &self.d);
        push_field(&mut blob, &self.p);
        push_field(&mut blob, &self.q);
        blob
    }

    /// Serialise the matching public key.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        let mut blob = Vec::from(*PUBLIC_KEY_MAGIC);
        push_field(&mut blob, &self.n);
        push_field(&mut blob, &self.e);
        blob
    }

    /// One backward step of the permutation.
    #[must_use]
    pub fn invert(&self, token: &SearchToken) -> SearchToken {
        let x = BigUint::from_bytes_be(token.as_bytes());

        // Garner recombination: m1 = x^dp mod p, m2 = x^dq mod q,
        // result = m2 + q * (q_inv (m1 - m2) mod p).
        let m1 = x.modpow(&self.d_p, &self.p);
        let m2 = x.modpow(&self.d_q, &self.q);

        let m2_mod_p = &m2 % &self.p;
        let diff = if m1 >= m2_mod_p {
            m1 - m2_mod_p
        } else {
            &self.p + m1 - m2_mod_p
        };
        let h = (&self.q_inv * diff) % &self.p;

        into_token(&(m2 + h * &self.q))
    }
}

impl fmt::Debug for TdpInverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdpInverse")
            .field("modulus_bits", &self.n.bits())
            .field("trapdoor", &"**REDACTED**")
            .finish()
    }
}

/// Left-pad a domain element back into token form.
fn into_token(x: &BigUint) -> SearchToken {
    let bytes = x.to_bytes_be();
    let mut out = [0u8; SEARCH_TOKEN_SIZE];
    out[SEARCH_TOKEN_SIZE - bytes.len()..].copy_from_slice(&bytes);
    SearchToken::from_bytes(out)
}

fn check_modulus(n: &BigUint) -> Result<(), Error> {
    if n.bits() > SEARCH_TOKEN_SIZE as u64 * 8 {
        return Err(Error::KeyMaterial(format!(
            "modulus of {} bits exceeds the {SEARCH_TOKEN_SIZE}-byte token domain",
            n.bits()
        )));
    }
    if n.is_even() || n.bits() < 512 {
        return Err(Error::KeyMaterial("implausible modulus".to_string()));
    }
    Ok(())
}

fn push_field(blob: &mut Vec<u8>, x: &BigUint) {
    let bytes = x.to_bytes_be();
    blob.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    blob.extend_from_slice(&bytes);
}

/// Cursor over a length-prefixed key blob.
struct BlobReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    fn new(bytes: &'a [u8], magic: &[u8; 4]) -> Result<Self, Error> {
        if bytes.len() < magic.len() || &bytes[..magic.len()] != magic {
            return Err(Error::KeyMaterial("unrecognised key blob".to_string()));
        }
        Ok(BlobReader {
            bytes,
            offset: magic.len(),
        })
    }

    fn field(&mut self) -> Result<BigUint, Error> {
        let truncated = || Error::KeyMaterial("truncated key blob".to_string());

        let len_end = self.offset.checked_add(4).ok_or_else(truncated)?;
        let len_bytes = self.bytes.get(self.offset..len_end).ok_or_else(truncated)?;
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;

        let end = len_end.checked_add(len).ok_or_else(truncated)?;
        let field = self.bytes.get(len_end..end).ok_or_else(truncated)?;
        self.offset = end;

        Ok(BigUint::from_bytes_be(field))
    }

    fn finish(self) -> Result<(), Error> {
        if self.offset != self.bytes.len() {
            return Err(Error::KeyMaterial(
                "trailing bytes after key blob".to_string(),
            ));
        }
        Ok(())
    }
}

fn modular_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let modulus = BigInt::from_biguint(Sign::Plus, modulus.clone());

    let ext = a.extended_gcd(&modulus);
    if !ext.gcd.is_one() {
        return None;
    }

    let mut x = ext.x % &modulus;
    if x.sign() == Sign::Minus {
        x += &modulus;
    }
    x.to_biguint()
}

/// Rejection-sample a prime of exactly `bits` bits whose predecessor is
/// coprime with `e`.
fn generate_prime(bits: u64, e: &BigUint, rng: &mut impl RngCore) -> BigUint {
    loop {
        let byte_len = ((bits + 7) / 8) as usize;
        let mut bytes = vec![0u8; byte_len];
        rng.fill_bytes(&mut bytes);

        let mut candidate = BigUint::from_bytes_be(&bytes);
        // Top two bits set so the product of two such primes has full width;
        // bottom bit set for oddness.
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(bits - 2, true);
        candidate.set_bit(0, true);

        if !is_probably_prime(&candidate, rng) {
            continue;
        }
        if (&candidate - 1u32).gcd(e).is_one() {
            return candidate;
        }
    }
}

fn is_probably_prime(n: &BigUint, rng: &mut impl RngCore) -> bool {
    const SMALL_PRIMES: [u32; 45] = [
        3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
        97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181,
        191, 193, 197, 199,
    ];

    if n.is_even() {
        return false;
    }
    for p in SMALL_PRIMES {
        if (n % p).is_zero() {
            return *n == BigUint::from(p);
        }
    }

    // n - 1 = d * 2^s with d odd
    let n_minus_1 = n - 1u32;
    let mut d = n_minus_1.clone();
    let mut s = 0u32;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    let two = BigUint::from(2u32);
    'witness: for _ in 0..PRIMALITY_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    // Keypair generation dominates test time, so every test shares one.
    // 768 bits keeps the arithmetic honest without the 2048-bit price tag.
    static KEYPAIR: Lazy<TdpInverse> =
        Lazy::new(|| TdpInverse::generate_with_modulus_bits(768).unwrap());

    fn token(fill: u8) -> SearchToken {
        // Low 64 bytes only, so the value is far below any 768-bit modulus.
        let mut bytes = [0u8; SEARCH_TOKEN_SIZE];
        for b in &mut bytes[SEARCH_TOKEN_SIZE - 64..] {
            *b = fill;
        }
        SearchToken::from_bytes(bytes)
    }

    fn public() -> Tdp {
        Tdp::from_public_key(&KEYPAIR.public_key()).unwrap()
    }

    #[test]
    fn invert_undoes_eval() {
        let tdp = public();
        let x = token(0x17);

        assert_eq!(x, KEYPAIR.invert(&tdp.eval(&x)));
        assert_eq!(x, tdp.eval(&KEYPAIR.invert(&x)));
    }

    #[test]
    fn eval_pow_matches_repeated_eval() {
        let tdp = public();
        let x = token(0x2a);

        let mut walked = x.clone();
        for k in 0..=17u32 {
            assert_eq!(walked, tdp.eval_pow(&x, k), "diverged at k = {k}");
            walked = tdp.eval(&walked);
        }
    }

    #[test]
    fn eval_pow_zero_is_identity() {
        let tdp = public();
        let x = token(0x99);

        assert_eq!(x, tdp.eval_pow(&x, 0));
    }

    #[test]
    fn long_chains_invert_back_to_the_start() {
        let tdp = public();
        let x = token(0x03);

        let mut st = x.clone();
        for _ in 0..100 {
            st = KEYPAIR.invert(&st);
        }
        assert_eq!(x, tdp.eval_pow(&st, 100));
    }

    #[test]
    fn private_blob_round_trips() {
        let restored = TdpInverse::from_private_key(&KEYPAIR.private_key()).unwrap();

        let x = token(0x44);
        assert_eq!(KEYPAIR.invert(&x), restored.invert(&x));
        assert_eq!(KEYPAIR.public_key(), restored.public_key());
    }

    #[test]
    fn public_blob_round_trips() {
        let tdp = public();
        let restored = Tdp::from_public_key(&tdp.public_key()).unwrap();

        let x = token(0x55);
        assert_eq!(tdp.eval(&x), restored.eval(&x));
    }

    #[test]
    fn mangled_blobs_are_rejected() {
        assert!(Tdp::from_public_key(b"SXPKgarbage").is_err());
        assert!(Tdp::from_public_key(b"").is_err());
        assert!(TdpInverse::from_private_key(&KEYPAIR.public_key()).is_err());

        let mut truncated = KEYPAIR.private_key();
        truncated.truncate(truncated.len() - 7);
        assert!(TdpInverse::from_private_key(&truncated).is_err());
    }

    #[test]
    fn unsupported_widths_are_rejected() {
        assert!(TdpInverse::generate_with_modulus_bits(100).is_err());
        assert!(TdpInverse::generate_with_modulus_bits(513).is_err());
        assert!(TdpInverse::generate_with_modulus_bits(4096).is_err());
    }

    #[test]
    fn debug_does_not_leak_the_trapdoor() {
        let debugged = format!("{:?}", &*KEYPAIR);

        assert!(debugged.contains("REDACTED"));
    }
}
