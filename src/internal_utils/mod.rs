// Copyright 2026 the crabby-heif authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod io;
pub mod pixels;
pub mod stream;

use crate::*;

use std::num::NonZero;
use std::ops::Range;

macro_rules! checked_add {
    ($a:expr, $b:expr) => {
        $a.checked_add($b).ok_or(crate::HeifError {
            kind: crate::ErrorKind::InvalidInput,
            sub_kind: crate::SubErrorKind::Unspecified,
            message: "arithmetic overflow".into(),
        })
    };
}

macro_rules! checked_sub {
    ($a:expr, $b:expr) => {
        $a.checked_sub($b).ok_or(crate::HeifError {
            kind: crate::ErrorKind::InvalidInput,
            sub_kind: crate::SubErrorKind::Unspecified,
            message: "arithmetic overflow".into(),
        })
    };
}

macro_rules! checked_mul {
    ($a:expr, $b:expr) => {
        $a.checked_mul($b).ok_or(crate::HeifError {
            kind: crate::ErrorKind::InvalidInput,
            sub_kind: crate::SubErrorKind::Unspecified,
            message: "arithmetic overflow".into(),
        })
    };
}

macro_rules! checked_incr {
    ($a:expr, $b:expr) => {
        $a = checked_add!($a, $b)?
    };
}

macro_rules! checked_decr {
    ($a:expr, $b:expr) => {
        $a = checked_sub!($a, $b)?
    };
}

pub(crate) use checked_add;
pub(crate) use checked_decr;
pub(crate) use checked_incr;
pub(crate) use checked_mul;
pub(crate) use checked_sub;

macro_rules! conversion_function {
    ($func:ident, $to: ident, $from:ty) => {
        pub(crate) fn $func(value: $from) -> HeifResult<$to> {
            $to::try_from(value).or(HeifError::overflow())
        }
    };
}

conversion_function!(usize_from_u64, usize, u64);
conversion_function!(usize_from_u32, usize, u32);
conversion_function!(usize_from_u16, usize, u16);
conversion_function!(u64_from_usize, u64, usize);
conversion_function!(u32_from_usize, u32, usize);
conversion_function!(u32_from_u64, u32, u64);
conversion_function!(u32_from_i32, u32, i32);
conversion_function!(u16_from_usize, u16, usize);
conversion_function!(u8_from_usize, u8, usize);
conversion_function!(i32_from_u32, i32, u32);

// 'clap' fractions do not follow the UFraction pattern: both numerators and
// denominators are used as i32 but are signalled as u32 in the bitstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct IFraction(pub i32, pub i32);

impl TryFrom<crate::utils::UFraction> for IFraction {
    type Error = HeifError;

    fn try_from(uf: crate::utils::UFraction) -> HeifResult<IFraction> {
        Ok(IFraction(uf.0 as i32, i32_from_u32(uf.1)?))
    }
}

impl IFraction {
    fn gcd(a: i32, b: i32) -> i32 {
        let mut a = if a < 0 { -(a as i64) } else { a as i64 };
        let mut b = if b < 0 { -(b as i64) } else { b as i64 };
        while b != 0 {
            let r = a % b;
            a = b;
            b = r;
        }
        a as i32
    }

    pub(crate) fn simplified(n: i32, d: i32) -> Self {
        let mut fraction = IFraction(n, d);
        fraction.simplify();
        fraction
    }

    pub(crate) fn simplify(&mut self) {
        let gcd = Self::gcd(self.0, self.1);
        if gcd > 1 {
            self.0 /= gcd;
            self.1 /= gcd;
        }
    }

    pub(crate) fn get_i32(&self) -> i32 {
        assert!(self.1 != 0);
        self.0 / self.1
    }

    pub(crate) fn get_u32(&self) -> HeifResult<u32> {
        u32_from_i32(self.get_i32())
    }

    pub(crate) fn is_integer(&self) -> bool {
        self.0 % self.1 == 0
    }

    fn common_denominator(&mut self, val: &mut IFraction) -> HeifResult<()> {
        self.simplify();
        if self.1 == val.1 {
            return Ok(());
        }
        let self_d = self.1;
        self.0 = checked_mul!(self.0, val.1)?;
        self.1 = checked_mul!(self.1, val.1)?;
        val.0 = checked_mul!(val.0, self_d)?;
        val.1 = checked_mul!(val.1, self_d)?;
        Ok(())
    }

    pub(crate) fn add(&mut self, val: &IFraction) -> HeifResult<()> {
        let mut val = *val;
        val.simplify();
        self.common_denominator(&mut val)?;
        self.0 = checked_add!(self.0, val.0)?;
        self.simplify();
        Ok(())
    }

    pub(crate) fn sub(&mut self, val: &IFraction) -> HeifResult<()> {
        let mut val = *val;
        val.simplify();
        self.common_denominator(&mut val)?;
        self.0 = checked_sub!(self.0, val.0)?;
        self.simplify();
        Ok(())
    }
}

pub(crate) fn check_limits(
    width: u32,
    height: u32,
    size_limit: Option<NonZero<u32>>,
    dimension_limit: Option<NonZero<u32>>,
) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    if let Some(limit) = size_limit {
        if width > limit.get() / height {
            return false;
        }
    }
    if let Some(limit) = dimension_limit {
        if width > limit.get() || height > limit.get() {
            return false;
        }
    }
    true
}

pub(crate) fn create_vec_exact<T>(size: usize) -> HeifResult<Vec<T>> {
    let mut v = Vec::<T>::new();
    checked_mul!(size, std::mem::size_of::<T>())?;
    if v.try_reserve_exact(size).is_err() {
        return HeifError::out_of_memory();
    }
    Ok(v)
}

pub(crate) fn check_slice_range(len: usize, range: &Range<usize>) -> HeifResult<()> {
    if range.start >= len || range.end > len {
        return HeifError::end_of_data();
    }
    Ok(())
}

pub(crate) fn is_auxiliary_type_alpha(aux_type: &str) -> bool {
    aux_type == "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha"
        || aux_type == "urn:mpeg:hevc:2015:auxid:1"
}

/// Byte budget charged for every allocation the decode of one file makes.
/// Exceeding the configured ceiling fails the enclosing operation.
#[derive(Debug, Default)]
pub(crate) struct MemoryBudget {
    used: u64,
}

impl MemoryBudget {
    pub(crate) fn charge(&mut self, bytes: u64, ceiling: u64) -> HeifResult<()> {
        let used = checked_add!(self.used, bytes)?;
        if used > ceiling {
            return HeifError::allocation_limit(format!(
                "allocation of {bytes} bytes exceeds the total memory ceiling of {ceiling}"
            ));
        }
        self.used = used;
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_simplify() {
        let f = IFraction::simplified(4, 12);
        assert_eq!(f.0, 1);
        assert_eq!(f.1, 3);
        assert!(f.is_integer() == false);
        assert_eq!(IFraction::simplified(12, 4).get_i32(), 3);
    }

    #[test]
    fn memory_budget() {
        let mut budget = MemoryBudget::default();
        assert!(budget.charge(100, 150).is_ok());
        assert!(budget.charge(51, 150).is_err());
        budget.reset();
        assert!(budget.charge(150, 150).is_ok());
    }
}
