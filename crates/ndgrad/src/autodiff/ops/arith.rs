//! Std operator impls for [`Tracked`].
//!
//! Operators delegate to the fallible methods and panic with the error
//! message when those fail (e.g. on incompatible shapes). Use the `try_*`
//! forms to handle errors instead.

use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::autodiff::tensor::Tracked;

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $try_method:ident) => {
        impl $trait<&Tracked> for &Tracked {
            type Output = Tracked;

            fn $method(self, rhs: &Tracked) -> Tracked {
                self.$try_method(rhs).unwrap_or_else(|err| panic!("{err}"))
            }
        }

        impl $trait<Tracked> for Tracked {
            type Output = Tracked;

            fn $method(self, rhs: Tracked) -> Tracked {
                (&self).$method(&rhs)
            }
        }

        impl $trait<&Tracked> for Tracked {
            type Output = Tracked;

            fn $method(self, rhs: &Tracked) -> Tracked {
                (&self).$method(rhs)
            }
        }

        impl $trait<Tracked> for &Tracked {
            type Output = Tracked;

            fn $method(self, rhs: Tracked) -> Tracked {
                self.$method(&rhs)
            }
        }

        impl $trait<f64> for &Tracked {
            type Output = Tracked;

            fn $method(self, rhs: f64) -> Tracked {
                self.$method(&self.scalar_like(rhs))
            }
        }

        impl $trait<f64> for Tracked {
            type Output = Tracked;

            fn $method(self, rhs: f64) -> Tracked {
                (&self).$method(rhs)
            }
        }

        impl $trait<&Tracked> for f64 {
            type Output = Tracked;

            fn $method(self, rhs: &Tracked) -> Tracked {
                (&rhs.scalar_like(self)).$method(rhs)
            }
        }

        impl $trait<Tracked> for f64 {
            type Output = Tracked;

            fn $method(self, rhs: Tracked) -> Tracked {
                self.$method(&rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, try_add);
impl_binary_operator!(Sub, sub, try_sub);
impl_binary_operator!(Mul, mul, try_mul);
impl_binary_operator!(Div, div, try_div);

impl Neg for &Tracked {
    type Output = Tracked;

    fn neg(self) -> Tracked {
        Tracked::neg(self).unwrap_or_else(|err| panic!("{err}"))
    }
}

impl Neg for Tracked {
    type Output = Tracked;

    fn neg(self) -> Tracked {
        -&self
    }
}
