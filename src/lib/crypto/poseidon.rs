use alloy_primitives::B256;
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};

/// Split a 32-byte word into two 128-bit big-endian limbs `(hi, lo)`.
///
/// Both limbs are far below the BN254 modulus, so the mapping from
/// 32-byte words to field pairs is injective.
pub fn b256_to_limbs(value: B256) -> (Fr, Fr) {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&value[..16]);
    lo.copy_from_slice(&value[16..]);
    (
        Fr::from(u128::from_be_bytes(hi)),
        Fr::from(u128::from_be_bytes(lo)),
    )
}

/// Convert BN254 field element to B256.
pub fn fr_to_b256(value: Fr) -> B256 {
    let big_int = value.into_bigint();
    let bytes = big_int.to_bytes_be();
    B256::from_slice(&bytes)
}

/// Poseidon hash (circom parameters) over an arbitrary number of field elements.
pub fn poseidon_fields(inputs: &[Fr]) -> B256 {
    let mut hasher =
        Poseidon::<Fr>::new_circom(inputs.len()).expect("Failed to create Poseidon hasher");
    let result = hasher
        .hash(inputs)
        .expect("Failed to compute Poseidon hash");
    fr_to_b256(result)
}

#[cfg(test)]
mod tests {
    use ark_ff::UniformRand;

    use super::*;

    #[test]
    fn test_limbs_split_high_and_low_halves() {
        let mut bytes = [0u8; 32];
        bytes[15] = 0x01;
        bytes[31] = 0x02;
        let (hi, lo) = b256_to_limbs(B256::from(bytes));
        assert_eq!(hi, Fr::from(1u64));
        assert_eq!(lo, Fr::from(2u64));
    }

    #[test]
    fn test_limbs_handle_words_above_modulus() {
        // 0xff.. exceeds the BN254 modulus as a single element but not as limbs
        let (hi, lo) = b256_to_limbs(B256::repeat_byte(0xFF));
        assert_eq!(hi, Fr::from(u128::MAX));
        assert_eq!(lo, Fr::from(u128::MAX));
    }

    #[test]
    fn test_fr_roundtrip_through_b256() {
        let mut rng = ark_std::test_rng();
        for _ in 0..8 {
            let value = Fr::rand(&mut rng);
            let bytes = fr_to_b256(value);
            assert_eq!(Fr::from_be_bytes_mod_order(bytes.as_ref()), value);
        }
    }

    #[test]
    fn test_poseidon_fields_deterministic() {
        let inputs = [Fr::from(1u64), Fr::from(2u64), Fr::from(3u64)];
        assert_eq!(poseidon_fields(&inputs), poseidon_fields(&inputs));
    }

    #[test]
    fn test_poseidon_fields_order_matters() {
        let a = [Fr::from(1u64), Fr::from(2u64)];
        let b = [Fr::from(2u64), Fr::from(1u64)];
        assert_ne!(poseidon_fields(&a), poseidon_fields(&b));
    }
}
