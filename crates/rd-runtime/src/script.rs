//! The scripting seam. The interpreter itself is external: anything that
//! can evaluate a script body against a [`ScriptContext`] plugs in through
//! [`ScriptEngine`]. The runtime only owns the SHA-1-keyed body cache and
//! the EVAL/EVALSHA/SCRIPT command surface.

use rd_protocol::RespFrame;

/// Narrow view of the server a script evaluation may touch. `call` runs a
/// command against the selected database under the same serialization as
/// the surrounding EVAL.
pub trait ScriptContext {
    fn call(&mut self, argv: &[Vec<u8>]) -> RespFrame;
}

/// An opaque script evaluator. Implementations receive the raw body plus
/// KEYS/ARGV and drive the server through the context.
pub trait ScriptEngine: Send {
    fn eval(
        &mut self,
        body: &[u8],
        keys: &[Vec<u8>],
        args: &[Vec<u8>],
        ctx: &mut dyn ScriptContext,
    ) -> RespFrame;
}

/// Hex SHA-1 of a script body, the cache key EVALSHA uses.
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = sha1(data);
    let mut out = String::with_capacity(40);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// SHA-1 as specified in RFC 3174. Self-contained: nothing else in the
/// workspace needs a digest crate and the block math is short.
fn sha1(data: &[u8]) -> [u8; 20] {
    let mut h: [u32; 5] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476, 0xc3d2_e1f0];

    let bit_len = (data.len() as u64).wrapping_mul(8);
    let mut message = data.to_vec();
    message.push(0x80);
    while message.len() % 64 != 56 {
        message.push(0);
    }
    message.extend_from_slice(&bit_len.to_be_bytes());

    let mut w = [0_u32; 80];
    for block in message.chunks_exact(64) {
        for (i, word) in block.chunks_exact(4).enumerate() {
            w[i] = u32::from_be_bytes(word.try_into().expect("4 bytes"));
        }
        for i in 16..80 {
            w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
        }

        let [mut a, mut b, mut c, mut d, mut e] = h;
        for (i, &word) in w.iter().enumerate() {
            let (f, k) = match i {
                0..=19 => ((b & c) | ((!b) & d), 0x5a82_7999),
                20..=39 => (b ^ c ^ d, 0x6ed9_eba1),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8f1b_bcdc),
                _ => (b ^ c ^ d, 0xca62_c1d6),
            };
            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(word);
            e = d;
            d = c;
            c = b;
            b = a.rotate_left(30);
            a = temp;
        }
        h[0] = h[0].wrapping_add(a);
        h[1] = h[1].wrapping_add(b);
        h[2] = h[2].wrapping_add(c);
        h[3] = h[3].wrapping_add(d);
        h[4] = h[4].wrapping_add(e);
    }

    let mut out = [0_u8; 20];
    for (i, word) in h.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_vectors() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            sha1_hex(b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq"),
            "84983e441c3bd26ebaae4aa1f95129e5e54670f1",
        );
        // The canonical one-liner clients ship first.
        assert_eq!(
            sha1_hex(b"return 1"),
            "e0e1f9fabfc9d4800c877a703b823ac0578ff8db",
        );
    }

    #[test]
    fn sha1_padding_boundaries() {
        // 55, 56 and 64 byte inputs cross the length-padding edges.
        let input55 = vec![b'a'; 55];
        let input56 = vec![b'a'; 56];
        let input64 = vec![b'a'; 64];
        assert_eq!(sha1_hex(&input55), "c1c8bbdc22796e28c0e15163d20899b65621d65a");
        assert_eq!(sha1_hex(&input56), "c2db330f6083854c99d4b5bfb6e8f29f201be699");
        assert_eq!(sha1_hex(&input64), "0098ba824b5c16427bd7a1122a5a442a25ec644d");
    }
}
