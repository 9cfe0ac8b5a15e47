// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 3394 AES key wrap.
//!
//! Join servers deliver session keys wrapped under a shared KEK; the
//! network server only ever unwraps. `wrap` exists for tests and tooling.

use crate::{AES128Key, Error, Result};
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

const IV: u64 = 0xa6a6_a6a6_a6a6_a6a6;

/// Wrap `plain` (multiple of 8 bytes, at least 16) under `kek`.
pub fn wrap(kek: &AES128Key, plain: &[u8]) -> Result<Vec<u8>> {
    if plain.len() < 16 || plain.len() % 8 != 0 {
        return Err(Error::InvalidKeyWrapLength(plain.len()));
    }
    let cipher = Aes128::new(kek.as_bytes().into());
    let n = plain.len() / 8;

    let mut a = IV;
    let mut r: Vec<u64> = plain
        .chunks(8)
        .map(|c| u64::from_be_bytes(c.try_into().expect("8-byte chunk")))
        .collect();

    for j in 0..6u64 {
        for (i, ri) in r.iter_mut().enumerate() {
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&a.to_be_bytes());
            block[8..].copy_from_slice(&ri.to_be_bytes());
            let mut b = block.into();
            cipher.encrypt_block(&mut b);
            let t = (n as u64) * j + (i as u64 + 1);
            a = u64::from_be_bytes(b[..8].try_into().expect("8 bytes")) ^ t;
            *ri = u64::from_be_bytes(b[8..].try_into().expect("8 bytes"));
        }
    }

    let mut out = Vec::with_capacity(8 * (n + 1));
    out.extend_from_slice(&a.to_be_bytes());
    for ri in r {
        out.extend_from_slice(&ri.to_be_bytes());
    }
    Ok(out)
}

/// Unwrap `wrapped` under `kek`, verifying the RFC 3394 integrity value.
pub fn unwrap(kek: &AES128Key, wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
        return Err(Error::InvalidKeyWrapLength(wrapped.len()));
    }
    let cipher = Aes128::new(kek.as_bytes().into());
    let n = wrapped.len() / 8 - 1;

    let mut a = u64::from_be_bytes(wrapped[..8].try_into().expect("8 bytes"));
    let mut r: Vec<u64> = wrapped[8..]
        .chunks(8)
        .map(|c| u64::from_be_bytes(c.try_into().expect("8-byte chunk")))
        .collect();

    for j in (0..6u64).rev() {
        for i in (0..n).rev() {
            let t = (n as u64) * j + (i as u64 + 1);
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&(a ^ t).to_be_bytes());
            block[8..].copy_from_slice(&r[i].to_be_bytes());
            let mut b = block.into();
            cipher.decrypt_block(&mut b);
            a = u64::from_be_bytes(b[..8].try_into().expect("8 bytes"));
            r[i] = u64::from_be_bytes(b[8..].try_into().expect("8 bytes"));
        }
    }

    if a != IV {
        return Err(Error::KeyWrapIntegrity);
    }

    let mut out = Vec::with_capacity(8 * n);
    for ri in r {
        out.extend_from_slice(&ri.to_be_bytes());
    }
    Ok(out)
}
