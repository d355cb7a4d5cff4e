// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Definition of types representing values expressed in a given unit.
//!
//! The types assume the following units:
//!
//! - [Length]: meters
//! - [Time]: seconds
//! - [Speed]: meter / second
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use serde_derive::{Deserialize, Serialize};

macro_rules! impl_unit(
    ( $( $t:ident ),* ) => {
        $(
            impl $t {
                /// Returns the zero value of the unit.
                pub const fn zero() -> Self {
                    Self(0.0)
                }

                /// Returns `true` if the value is finite and non-negative.
                pub fn is_valid(self) -> bool {
                    self.0.is_finite() && self.0 >= 0.0
                }
            }

            impl Add for $t {
                type Output = Self;
                fn add(self, rhs: Self) -> Self::Output {
                    Self(self.0 + rhs.0)
                }
            }

            impl AddAssign for $t {
                fn add_assign(&mut self, rhs: Self) {
                    self.0 += rhs.0;
                }
            }

            impl Sub for $t {
                type Output = Self;
                fn sub(self, rhs: Self) -> Self::Output {
                    Self(self.0 - rhs.0)
                }
            }

            impl Mul<f64> for $t {
                type Output = Self;
                fn mul(self, rhs: f64) -> Self::Output {
                    Self(self.0 * rhs)
                }
            }

            impl Sum for $t {
                fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                    Self(iter.map(|v| v.0).sum())
                }
            }

            impl fmt::Display for $t {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{:.3}", self.0)
                }
            }
        )*
    }
);

/// Time duration, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Time(pub f64);

/// Length, in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Length(pub f64);

/// Speed, in meters per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Speed(pub f64);

impl_unit!(Time, Length, Speed);

impl Div<Speed> for Length {
    type Output = Time;
    fn div(self, rhs: Speed) -> Self::Output {
        Time(self.0 / rhs.0)
    }
}

impl Div<Length> for Length {
    type Output = f64;
    fn div(self, rhs: Length) -> Self::Output {
        self.0 / rhs.0
    }
}
