//! Fixed Diffie-Hellman domain parameters.
//!
//! Every client ships with the same 512-bit modulus `N`, generator `g` and
//! private exponent `X`. The server holds the matching public value
//! `A = g^X mod N` and only ever sends its own half `B` during the
//! handshake; the client never transmits anything secret.
//!
//! The constants are stored little-endian to match the format the server
//! operators publish; values on the wire are big-endian and padded to the
//! modulus width.

use std::fmt;
use std::sync::OnceLock;

use num_bigint::BigUint;

/// Size of the embedded modulus in bits.
pub const KEY_BITS: u64 = 512;

/// Wire width of every public value and shared secret.
pub const KEY_BYTES: usize = (KEY_BITS / 8) as usize;

const GENERATOR: u32 = 41;

const MODULUS_LE: [u8; KEY_BYTES] = [
    0x2d, 0x17, 0x19, 0x42, 0xeb, 0x71, 0x8f, 0x91, 0x29, 0x7c, 0x61, 0x88, 0x43, 0x75, 0xe5, 0xee,
    0x72, 0xfe, 0x45, 0x1b, 0x43, 0xc3, 0x8e, 0xb9, 0x47, 0x5e, 0x03, 0xc8, 0x0c, 0x78, 0xb7, 0xe4,
    0x4d, 0x31, 0x5b, 0xcb, 0x66, 0xc2, 0x54, 0x1a, 0x0a, 0x61, 0x11, 0x57, 0x38, 0x66, 0x9b, 0x34,
    0x6b, 0xab, 0x6d, 0x12, 0x12, 0x38, 0x87, 0xc5, 0x3f, 0x20, 0xbe, 0x97, 0xa3, 0xa6, 0x56, 0x8f,
];

const CLIENT_SECRET_LE: [u8; KEY_BYTES] = [
    0x21, 0xcf, 0x1d, 0xc6, 0x08, 0xc0, 0x23, 0xad, 0x53, 0x36, 0xce, 0x61, 0x25, 0xdd, 0xb9, 0x55,
    0x05, 0xc1, 0xbb, 0x8f, 0xf4, 0x0d, 0x59, 0xf9, 0x20, 0x27, 0x9a, 0xee, 0xfb, 0x23, 0x5b, 0xeb,
    0xe5, 0xec, 0x01, 0x55, 0x2e, 0xd5, 0x64, 0xef, 0xea, 0x43, 0xb1, 0x9e, 0xb9, 0x8c, 0x75, 0x3f,
    0xda, 0xb2, 0xbb, 0xb3, 0x6a, 0x3d, 0xcd, 0xbc, 0xfa, 0x6f, 0x03, 0xf3, 0x55, 0xd8, 0xe9, 0x1b,
];

/// Modulus, generator and client exponent for the key agreement.
#[derive(Clone, PartialEq, Eq)]
pub struct DomainParameters {
    modulus: BigUint,
    generator: BigUint,
    client_secret: BigUint,
}

impl DomainParameters {
    /// The process-wide embedded parameters, decoded once.
    pub fn global() -> &'static DomainParameters {
        static PARAMS: OnceLock<DomainParameters> = OnceLock::new();
        PARAMS.get_or_init(Self::embedded)
    }

    /// Decodes the embedded constants.
    pub fn embedded() -> Self {
        Self {
            modulus: BigUint::from_bytes_le(&MODULUS_LE),
            generator: BigUint::from(GENERATOR),
            client_secret: BigUint::from_bytes_le(&CLIENT_SECRET_LE),
        }
    }

    /// Builds parameters from explicit values.
    pub fn new(modulus: BigUint, generator: BigUint, client_secret: BigUint) -> Self {
        Self {
            modulus,
            generator,
            client_secret,
        }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Byte width of values modulo `N`.
    pub fn width(&self) -> usize {
        self.modulus.bits().div_ceil(8) as usize
    }

    /// `A = g^X mod N`, the value the server already knows for this client.
    pub fn client_public_value(&self) -> BigUint {
        self.generator.modpow(&self.client_secret, &self.modulus)
    }

    /// Rejects degenerate public values.
    ///
    /// Values outside `[2, N-2]` (0, 1 and N-1 in particular) collapse the
    /// shared secret to a predictable constant.
    pub fn is_valid_public_value(&self, value: &BigUint) -> bool {
        let two = BigUint::from(2u32);
        if self.modulus <= two {
            return false;
        }
        let upper = &self.modulus - &two;
        *value >= two && *value <= upper
    }

    /// `K = B^X mod N`, or `None` when `B` is degenerate.
    pub fn shared_secret(&self, server_public: &BigUint) -> Option<BigUint> {
        if !self.is_valid_public_value(server_public) {
            return None;
        }
        Some(server_public.modpow(&self.client_secret, &self.modulus))
    }

    /// Big-endian encoding left-padded to [`width`](Self::width).
    pub fn encode_value(&self, value: &BigUint) -> Vec<u8> {
        let width = self.width();
        let raw = value.to_bytes_be();
        if raw.len() >= width {
            return raw;
        }
        let mut out = vec![0u8; width - raw.len()];
        out.extend_from_slice(&raw);
        out
    }

    /// Decodes a big-endian wire value.
    pub fn decode_value(&self, bytes: &[u8]) -> BigUint {
        BigUint::from_bytes_be(bytes)
    }
}

impl fmt::Debug for DomainParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainParameters")
            .field("modulus_bits", &self.modulus.bits())
            .field("generator", &self.generator)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
