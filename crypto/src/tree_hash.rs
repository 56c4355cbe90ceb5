use crate::hash::{cn_fast_hash, Hash256};

/// Largest power of two strictly below `count`
fn tree_hash_cnt(count: usize) -> usize {
    assert!(count >= 3);
    assert!(count <= 0x1000_0000);

    let mut pow: usize = 2;
    while pow < count {
        pow <<= 1;
    }
    pow >> 1
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf: [u8; 64] = [0; 64];
    buf[..32].copy_from_slice(left.data());
    buf[32..].copy_from_slice(right.data());
    cn_fast_hash(&buf)
}

/// Computes the Cryptonote Merkle tree root of the given hash list
///
/// Blocks commit to their transactions through this root: the input is
/// the miner transaction hash followed by the hashes of every regular
/// transaction, in block order
///
/// # Panics
/// If `hashes` is empty. Every block carries at least the miner
/// transaction, so an empty input indicates caller corruption
pub fn tree_hash(hashes: &[Hash256]) -> Hash256 {
    assert!(!hashes.is_empty());
    match hashes.len() {
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        len => {
            let mut cnt = tree_hash_cnt(len);

            // The first 2*cnt - len hashes are carried down unchanged;
            // the remainder are paired to flatten the list to a power of
            // two
            let mut buf: Vec<Hash256> = hashes[..(2 * cnt - len)].to_vec();
            let mut i = 2 * cnt - len;
            while i < len {
                buf.push(hash_pair(&hashes[i], &hashes[i + 1]));
                i += 2;
            }
            assert_eq!(buf.len(), cnt);

            while cnt > 1 {
                cnt >>= 1;
                for j in 0..cnt {
                    buf[j] = hash_pair(&buf[2 * j], &buf[2 * j + 1]);
                }
            }

            buf[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::*;

    #[test]
    fn matches_reference_vectors() {
        [
            (
                "676567f8b1b470207c20d8efbaacfa64b2753301b46139562111636f36304bb8",
                "676567f8b1b470207c20d8efbaacfa64b2753301b46139562111636f36304bb8",
            ),
            (
                "3124758667bc8e76e25403eee75a1044175d58fcd3b984e0745d0ab18f473984975ce54240407d80eedba2b395bcad5be99b5c920abc2423865e3066edd4847a",
                "5077570fed2363a14fa978218185b914059e23517faf366f08a87cf3c47fd58e",
            ),
            (
                "decc1e0aa505d7d5fbe8ed823d7f5da55307c4cc7008e306da82dbce492a0576dbcf0c26646d36b36a92408941f5f2539f7715bcb1e2b1309cedb86ae4211554f56f5e6b2fce16536e44c851d473d1f994793873996ba448dd59b3b4b922b183",
                "f8e26aaa7c36523cea4c5202f2df159c62bf70d10670c96aed516dbfd5cb5227",
            ),
            (
                "53edbbf98d3fa50a85fd2d46c42502aafad3fea30bc25ba4f16ec8bf4a475c4d87da8ad3e5c90aae0b10a559a77a0985608eaa3cc3dd338239be52572c3bdf4ba403d27466991997b3cf4e8d238d002a1451ccc9c4790269d0f0085d9382d60fef37717f59726e4cc8787d5d2d75238ba9adb9627a8f4aeeec8d80465ed3f5fb",
                "45f6e06fc0263e667caddd8fba84c9fb723a961a01a5b115f7cab7fe8f2c7e44",
            ),
            (
                "051a082e670c688e6a0fc2c8fd5b66b7a23cd380c7c49bd0cfffb0e80fb8c2334bb717c5e90db0ac353dfc0750c8b43a07edae0be99d6e820acc6da9f113123ae084c38ccdbf9c6730e228b5d98e7beb9843cfb523747cc32f09f2b16def67f76765cee044883827b9af31c179d3135b16c30f04453943d9676a59b907a6439658f6c98159b8fa1b152f1bcf748740754ca31c918501dbd577faf602c641df59",
                "e678fb87749ec082a9f92537716de8e19d8bd5bc4c4d832bd3fcfd42498dac83",
            ),
        ]
        .iter()
        .for_each(|(input, expected)| {
            let buf = hex::decode(input).unwrap();
            let hashes: Vec<Hash256> = buf
                .chunks(32)
                .map(|chunk| {
                    let mut data = [0; 32];
                    data.copy_from_slice(chunk);
                    Hash256::from(data)
                })
                .collect();
            assert_eq!(tree_hash(&hashes), Hash256::try_from(*expected).unwrap());
        });
    }
}
