//! Extended friend list: a fixed-size, pseudorandomly positioned, null-padded
//! encoding of a variable-size friend set.

use std::collections::BTreeSet;
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use sha2::{Digest, Sha256};

use crate::crypto::sampler::{HashStream, SlotArena};
use crate::domain::encoding::pad_address;
use crate::domain::params::{ProtocolParams, NULL_ADDRESS};
use crate::domain::validation::ValidationError;

/// Fixed-length friend list; unused slots hold [`NULL_ADDRESS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedFriendList {
    slots: Vec<Address>,
}

impl ExtendedFriendList {
    pub fn slots(&self) -> &[Address] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots holding a real friend.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, Address)> + '_ {
        self.slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, addr)| *addr != NULL_ADDRESS)
    }

    /// Slots holding the null sentinel, in ascending order.
    pub fn null_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, addr)| **addr == NULL_ADDRESS)
            .map(|(i, _)| i)
    }

    /// 32-byte leaf encodings, one per slot.
    pub fn padded(&self) -> Vec<B256> {
        self.slots.iter().map(|addr| pad_address(*addr)).collect()
    }

    /// Resolve a logical friend index to its physical slot.
    ///
    /// `logical_index < friends.len()` selects that friend in `friends`
    /// (caller order). Larger values select the
    /// `(logical_index - friends.len())`-th null slot, for decoy submissions.
    pub fn extended_index_of(
        &self,
        friends: &[Address],
        logical_index: usize,
    ) -> Result<usize, ValidationError> {
        let out_of_range = ValidationError::LogicalIndexOutOfRange {
            index: logical_index,
            slots: self.slots.len(),
        };
        if let Some(friend) = friends.get(logical_index) {
            return self
                .slots
                .iter()
                .position(|slot| slot == friend)
                .ok_or_else(|| ValidationError::InvalidIdentifier(friend.to_string()));
        }
        self.null_slots()
            .nth(logical_index - friends.len())
            .ok_or(out_of_range)
    }
}

/// Parse hex address strings, rejecting anything that is not a 20-byte address.
pub fn parse_friends<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Address>, ValidationError> {
    raw.iter()
        .map(|s| {
            let s = s.as_ref();
            Address::from_str(s).map_err(|_| ValidationError::InvalidIdentifier(s.to_string()))
        })
        .collect()
}

/// Check params, size and identifiers, then return the friends in canonical (ascending byte) order.
pub fn canonicalize(
    friends: &[Address],
    params: &ProtocolParams,
) -> Result<Vec<Address>, ValidationError> {
    params.validate()?;
    if friends.len() > params.max_friends_len {
        return Err(ValidationError::TooManyFriends {
            count: friends.len(),
            max: params.max_friends_len,
        });
    }
    let mut sorted = BTreeSet::new();
    for friend in friends {
        if *friend == NULL_ADDRESS {
            return Err(ValidationError::InvalidIdentifier(friend.to_string()));
        }
        if !sorted.insert(*friend) {
            return Err(ValidationError::DuplicateFriend(friend.to_string()));
        }
    }
    Ok(sorted.into_iter().collect())
}

/// `sha256(friend_0 || ... || friend_n-1 || passphrase || threshold || nonce)` over
/// canonically ordered 20-byte friend addresses.
pub fn placement_seed(canonical: &[Address], passphrase: B256, threshold: B256, nonce: B256) -> B256 {
    let mut hasher = Sha256::new();
    for friend in canonical {
        hasher.update(friend.as_slice());
    }
    hasher.update(passphrase);
    hasher.update(threshold);
    hasher.update(nonce);
    B256::from(<[u8; 32]>::from(hasher.finalize()))
}

/// Expand `friends` into an [`ExtendedFriendList`].
///
/// Deterministic in `(friends as a set, passphrase, threshold, nonce)`: the
/// caller's ordering never influences placement.
pub fn extend_friends(
    friends: &[Address],
    passphrase: B256,
    threshold: B256,
    nonce: B256,
    params: &ProtocolParams,
) -> Result<ExtendedFriendList, ValidationError> {
    let canonical = canonicalize(friends, params)?;
    let mut stream = HashStream::new(placement_seed(&canonical, passphrase, threshold, nonce));
    let mut arena = SlotArena::new(params.max_friends_len);

    let mut slots = vec![NULL_ADDRESS; params.max_friends_len];
    for friend in canonical {
        let slot = arena
            .draw(&mut stream)
            .ok_or(ValidationError::TooManyFriends {
                count: friends.len(),
                max: params.max_friends_len,
            })?;
        slots[slot] = friend;
    }
    Ok(ExtendedFriendList { slots })
}
