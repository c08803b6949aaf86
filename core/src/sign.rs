//! App signature helpers for the `apps` request header.

use md5::{Digest, Md5};

/// Uppercase hex MD5 over all signing certificates, in order.
pub fn signature_digest(signatures: &[Vec<u8>]) -> String {
    let mut digest = Md5::new();
    for s in signatures {
        digest.update(s);
    }
    hex::encode_upper(digest.finalize())
}

/// Lowercase hex MD5 of the signature digest followed by the version name.
pub fn app_sign(signature: &str, version: &str) -> String {
    let mut digest = Md5::new();
    digest.update(signature.as_bytes());
    digest.update(version.as_bytes());
    hex::encode(digest.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_signature_set_hashes_nothing() {
        assert_eq!(signature_digest(&[]), "D41D8CD98F00B204E9800998ECF8427E");
    }

    #[test]
    fn certificates_are_concatenated() {
        let split = signature_digest(&[b"ab".to_vec(), b"c".to_vec()]);
        let joined = signature_digest(&[b"abc".to_vec()]);
        assert_eq!(split, joined);
        assert_eq!(joined, "900150983CD24FB0D6963F7D28E17F72");
    }

    #[test]
    fn app_sign_is_lowercase_md5_of_concatenation() {
        assert_eq!(app_sign("ab", "c"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
