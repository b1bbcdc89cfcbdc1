//! The two messages a client sends to a server, and the shared token
//! derivation both ends must agree on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::prf::Prf;
use crate::token::{
    SearchToken, UpdateToken, CHAIN_MASK_TAG, CHAIN_TOKEN_TAG, DERIVATION_KEY_SIZE,
    UPDATE_TOKEN_SIZE,
};

/// Asks the server to walk a keyword's token chain and return every index
/// stored along it.
///
/// `token` is the keyword's search token as of the moment the request was
/// built, and `add_count` the number of updates performed for the keyword up
/// to that moment. Handing over `derivation_key` lets the server derive the
/// chain's update tokens and masks -- and nothing else.
#[derive(Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The keyword's PRF key.
    pub derivation_key: [u8; DERIVATION_KEY_SIZE],
    /// The keyword's current search token.
    pub token: SearchToken,
    /// How many chain steps the server should walk.
    pub add_count: u64,
}

impl fmt::Debug for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRequest")
            .field("derivation_key", &"**REDACTED**")
            .field("token", &self.token)
            .field("add_count", &self.add_count)
            .finish()
    }
}

/// Asks the server to record one masked index under an opaque token.
///
/// The index is already XOR-masked by the client; the server stores the pair
/// verbatim and learns nothing from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// The key under which the masked index is stored.
    pub token: UpdateToken,
    /// The masked index.
    pub index: u64,
}

/// The update token for one chain position: `PRF(st ‖ '0')`.
pub(crate) fn derive_update_token(prf: &Prf<UPDATE_TOKEN_SIZE>, st: &SearchToken) -> UpdateToken {
    UpdateToken::from_bytes(prf.prf(&st.chain_input(CHAIN_TOKEN_TAG)))
}

/// The index mask for one chain position: the low eight bytes of
/// `PRF(st ‖ '1')`, little-endian. Both ends use this exact truncation, so
/// masking and unmasking are the same operation.
pub(crate) fn derive_mask_word(prf: &Prf<UPDATE_TOKEN_SIZE>, st: &SearchToken) -> u64 {
    let out = prf.prf(&st.chain_input(CHAIN_MASK_TAG));
    let mut word = [0u8; 8];
    word.copy_from_slice(&out[..8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SEARCH_TOKEN_SIZE;

    fn prf() -> Prf<UPDATE_TOKEN_SIZE> {
        Prf::new(&[7u8; DERIVATION_KEY_SIZE])
    }

    fn st() -> SearchToken {
        SearchToken::from_bytes([0x41; SEARCH_TOKEN_SIZE])
    }

    #[test]
    fn token_and_mask_roles_are_separated() {
        let ut = derive_update_token(&prf(), &st());
        let mask = derive_mask_word(&prf(), &st());

        // Same PRF, same token, different tag byte: outputs must be
        // unrelated. Compare the mask against the token's low word.
        let mut word = [0u8; 8];
        word.copy_from_slice(&ut.as_bytes()[..8]);
        assert_ne!(mask, u64::from_le_bytes(word));
    }

    #[test]
    fn debug_hides_the_derivation_key() {
        let req = SearchRequest {
            derivation_key: [0xaa; DERIVATION_KEY_SIZE],
            token: st(),
            add_count: 3,
        };
        let debugged = format!("{req:?}");

        assert!(debugged.contains("REDACTED"));
        assert!(!debugged.contains("aaaa"));
    }

    quickcheck! {
        fn masking_round_trips(index: u64) -> bool {
            let mask = derive_mask_word(&prf(), &st());

            (index ^ mask) ^ mask == index
        }
    }
}
