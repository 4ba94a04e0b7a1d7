// This file is part of chord-dht.
// Copyright (C) 2026 The chord-dht Authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(unreachable_pub)]
//! Ring identifier algebra.
//!
//! Every routing, ownership, and stabilization decision in this workspace
//! reduces to arithmetic over a cyclic `[0, 2^m)` identifier space. This
//! crate is the single place that arithmetic is defined, so that the rest
//! of the workspace never reimplements wrap-around comparisons.

use ethnum::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The largest bit-width this crate can represent; `U256` backs every `Id`
/// regardless of the ring's configured `m`, so `m` can range up to 256.
pub const MAX_M: u32 = 256;

/// An identifier in the ring's `[0, 2^m)` space.
///
/// `Id` does not carry its own `m` — the same value is meaningless without
/// the [`Ring`] it was produced by. Values are always pre-masked to their
/// ring's bit-width by the [`Ring`] methods that construct them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(pub U256);

impl Id {
    /// The identifier `0`.
    pub const ZERO: Id = Id(U256::ZERO);

    /// Renders the identifier as a fixed-width hex string, useful for logs
    /// and `NodeInfo` responses.
    pub fn to_hex(self) -> String {
        format!("{:064x}", self.0)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A ring's identifier space: just its bit-width `m`, plus the hashing and
/// arc-arithmetic operations that are relative to it.
///
/// `m` is fixed for the lifetime of a `Ring` — reconfiguring it at runtime
/// is out of scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ring {
    m: u32,
}

impl Ring {
    /// Builds a ring with bit-width `m`. `m` must be in `1..=256`.
    pub fn new(m: u32) -> Self {
        assert!((1..=MAX_M).contains(&m), "m must be in 1..=256, got {m}");
        Self { m }
    }

    /// The ring's configured bit-width.
    pub fn m(&self) -> u32 {
        self.m
    }

    /// `2^m` as a `U256`, or `U256::ZERO` when `m == 256` (the modulus
    /// overflows the backing type; masking against it is then a no-op,
    /// which is the correct behavior since every `U256` is already `< 2^256`).
    fn modulus(&self) -> U256 {
        if self.m >= MAX_M {
            U256::ZERO
        } else {
            U256::ONE << self.m
        }
    }

    /// Reduces `x` modulo `2^m`.
    fn mask(&self, x: U256) -> Id {
        let modulus = self.modulus();
        if modulus == U256::ZERO {
            Id(x)
        } else {
            Id(x & (modulus - 1))
        }
    }

    /// `hash_key(bytes) -> Id`: a deterministic hash of a key,
    /// folded to `m` bits.
    pub fn hash_key(&self, key: &str) -> Id {
        self.hash_bytes(key.as_bytes())
    }

    /// `hash_addr(addr) -> Id`: a deterministic hash of a node's
    /// transport address, folded to `m` bits. IDs are assumed collision-free
    /// within a ring.
    pub fn hash_addr(&self, addr: &str) -> Id {
        self.hash_bytes(addr.as_bytes())
    }

    fn hash_bytes(&self, bytes: &[u8]) -> Id {
        let digest = Sha256::digest(bytes);
        let wide = U256::from_be_bytes(digest.into());
        self.mask(wide)
    }

    /// `add_pow2(id, i) -> Id`: `(id + 2^i) mod 2^m`, used to
    /// compute a finger's `start_i`.
    pub fn add_pow2(&self, id: Id, i: u32) -> Id {
        debug_assert!(i < self.m, "finger index {i} out of range for m={}", self.m);
        let addend = if i >= MAX_M { U256::ZERO } else { U256::ONE << i };
        self.mask(id.0.wrapping_add(addend))
    }

    /// `distance_cw(a, b) -> Id`: the clockwise arc length from `a` to `b`;
    /// `0` iff `a == b`.
    pub fn distance_cw(&self, a: Id, b: Id) -> Id {
        self.mask(b.0.wrapping_sub(a.0))
    }

    /// `x ∈ (a, b)`. When `a == b` this is the empty arc and always returns
    /// `false`.
    pub fn in_open(&self, x: Id, a: Id, b: Id) -> bool {
        if a == b {
            return false;
        }
        let d_ab = self.distance_cw(a, b);
        let d_ax = self.distance_cw(a, x);
        d_ax != Id::ZERO && d_ax < d_ab
    }

    /// `x ∈ [a, b)`.
    ///
    /// The edge policy here follows standard Chord practice for the
    /// half-closed forms: when `a == b` the arc denotes the *entire* ring,
    /// which is exactly what a lone node's `(self, self]` ownership arc must
    /// mean. See `DESIGN.md`.
    pub fn in_left_closed(&self, x: Id, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        let d_ab = self.distance_cw(a, b);
        let d_ax = self.distance_cw(a, x);
        d_ax < d_ab
    }

    /// `x ∈ (a, b]`. See [`Ring::in_left_closed`] for the `a == b` policy.
    pub fn in_right_closed(&self, x: Id, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        self.in_open(x, a, b) || x == b
    }

    /// `x ∈ [a, b]`. When `a == b` this is the singleton arc and returns
    /// `x == a`.
    pub fn in_closed(&self, x: Id, a: Id, b: Id) -> bool {
        if a == b {
            return x == a;
        }
        x == a || x == b || self.in_open(x, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_ring() -> Ring {
        Ring::new(8)
    }

    fn id(v: u64) -> Id {
        Id(U256::from(v))
    }

    #[test]
    fn hash_key_is_deterministic_and_in_range() {
        let ring = small_ring();
        let a = ring.hash_key("hello");
        let b = ring.hash_key("hello");
        assert_eq!(a, b);
        assert!(a.0 < U256::from(256u32));
    }

    #[test]
    fn add_pow2_wraps() {
        let ring = small_ring();
        // id = 250, i = 3 -> 2^3 = 8, 250 + 8 = 258 mod 256 = 2
        assert_eq!(ring.add_pow2(id(250), 3), id(2));
    }

    #[test]
    fn distance_cw_zero_iff_equal() {
        let ring = small_ring();
        assert_eq!(ring.distance_cw(id(42), id(42)), Id::ZERO);
        assert_ne!(ring.distance_cw(id(42), id(43)), Id::ZERO);
        // wrap-around: from 250 to 2 is 8 hops clockwise
        assert_eq!(ring.distance_cw(id(250), id(2)), id(8));
    }

    #[test]
    fn in_open_edge_policy_empty_when_equal() {
        let ring = small_ring();
        assert!(!ring.in_open(id(5), id(5), id(5)));
        assert!(!ring.in_open(id(99), id(5), id(5)));
    }

    #[test]
    fn in_closed_edge_policy_singleton_when_equal() {
        let ring = small_ring();
        assert!(ring.in_closed(id(5), id(5), id(5)));
        assert!(!ring.in_closed(id(6), id(5), id(5)));
    }

    #[test]
    fn half_closed_full_ring_when_equal() {
        let ring = small_ring();
        for x in [0u64, 1, 5, 200, 255] {
            assert!(ring.in_left_closed(id(x), id(5), id(5)));
            assert!(ring.in_right_closed(id(x), id(5), id(5)));
        }
    }

    #[test]
    fn arcs_respect_wrap_around() {
        let ring = small_ring();
        // node at 250, successor at 2: owns (250, 2]
        assert!(ring.in_right_closed(id(255), id(250), id(2)));
        assert!(ring.in_right_closed(id(0), id(250), id(2)));
        assert!(ring.in_right_closed(id(2), id(250), id(2)));
        assert!(!ring.in_right_closed(id(3), id(250), id(2)));
        assert!(!ring.in_right_closed(id(250), id(250), id(2)));
    }

    proptest! {
        // for all a != b, exactly one of in_open(c,a,b), c==a,
        // c==b, in_open(c,b,a) holds.
        #[test]
        fn exactly_one_partition_holds(a in 0u64..256, b in 0u64..256, c in 0u64..256) {
            let ring = small_ring();
            let (a, b, c) = (id(a), id(b), id(c));
            prop_assume!(a != b);
            let branches = [
                ring.in_open(c, a, b),
                c == a,
                c == b,
                ring.in_open(c, b, a),
            ];
            prop_assert_eq!(branches.iter().filter(|&&b| b).count(), 1);
        }

        #[test]
        fn in_closed_is_union_of_open_and_endpoints(a in 0u64..256, b in 0u64..256, c in 0u64..256) {
            let ring = small_ring();
            let (a, b, c) = (id(a), id(b), id(c));
            let expected = if a == b {
                c == a
            } else {
                c == a || c == b || ring.in_open(c, a, b)
            };
            prop_assert_eq!(ring.in_closed(c, a, b), expected);
        }

        #[test]
        fn distance_cw_never_exceeds_modulus(a in 0u64..256, b in 0u64..256) {
            let ring = small_ring();
            let d = ring.distance_cw(id(a), id(b));
            prop_assert!(d.0 < U256::from(256u32));
        }
    }
}
