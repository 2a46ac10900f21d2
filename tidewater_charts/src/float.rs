// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Float helpers for `no_std` builds.
//!
//! Rounding methods like `f64::ceil` are not available in `core`; this trait dispatches to
//! `libm` when `std` is off.

/// Float math helpers for `f64` in `no_std` mode.
pub(crate) trait FloatExt {
    fn ceil(self) -> Self;
}

#[cfg(all(not(feature = "std"), feature = "libm"))]
impl FloatExt for f64 {
    fn ceil(self) -> Self {
        libm::ceil(self)
    }
}

#[cfg(all(not(feature = "std"), not(feature = "libm")))]
compile_error!("tidewater_charts requires either the `std` or `libm` feature");
