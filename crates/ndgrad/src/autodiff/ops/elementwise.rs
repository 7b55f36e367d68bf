//! Elementwise operations and their VJP rules.

use smallvec::smallvec;

use crate::autodiff::tensor::Tracked;
use crate::backend::{BinaryOp, UnaryOp};
use crate::error::Result;

type Pair = (Option<Tracked>, Option<Tracked>);

impl Tracked {
    /// Record a broadcasting binary operation.
    ///
    /// `rule(a, b, out, g)` returns contributions in the output's shape;
    /// they are reduced back to each operand's shape here.
    fn binary_op<F>(&self, op: BinaryOp, other: &Tracked, rule: F) -> Result<Tracked>
    where
        F: Fn(&Tracked, &Tracked, &Tracked, &Tracked) -> Result<Pair> + 'static,
    {
        let value = self.value().binary(op, other.value())?;
        let (a, b) = (self.clone(), other.clone());
        Ok(Tracked::record(value, op.name(), &[self, other], move |out, g| {
            let (da, db) = rule(&a, &b, out, g)?;
            Ok(smallvec![
                da.map(|d| d.sum_to_shape(a.shape())).transpose()?,
                db.map(|d| d.sum_to_shape(b.shape())).transpose()?,
            ])
        }))
    }

    /// Record a unary operation whose rule is `rule(x, out, g)`.
    fn unary_op<F>(&self, op: UnaryOp, rule: F) -> Result<Tracked>
    where
        F: Fn(&Tracked, &Tracked, &Tracked) -> Result<Tracked> + 'static,
    {
        let value = self.value().unary(op)?;
        let x = self.clone();
        Ok(Tracked::record(value, op.name(), &[self], move |out, g| {
            Ok(smallvec![Some(rule(&x, out, g)?)])
        }))
    }

    /// Elementwise sum with broadcasting.
    pub fn try_add(&self, other: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Add, other, |_, _, _, g| {
            Ok((Some(g.clone()), Some(g.clone())))
        })
    }

    /// Elementwise difference with broadcasting.
    pub fn try_sub(&self, other: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Sub, other, |_, _, _, g| {
            Ok((Some(g.clone()), Some(g.neg()?)))
        })
    }

    /// Elementwise product with broadcasting.
    pub fn try_mul(&self, other: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Mul, other, |a, b, _, g| {
            Ok((Some(g.try_mul(b)?), Some(g.try_mul(a)?)))
        })
    }

    /// Elementwise quotient with broadcasting.
    pub fn try_div(&self, other: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Div, other, |_, b, out, g| {
            // d(a/b)/db = -a/b^2 = -out/b
            let db = g.try_mul(out)?.try_div(b)?.neg()?;
            Ok((Some(g.try_div(b)?), Some(db)))
        })
    }

    /// Elementwise power `self ** exponent`.
    ///
    /// The exponent's contribution `g * out * ln(self)` is only computed when
    /// the exponent is itself traced.
    pub fn pow(&self, exponent: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Pow, exponent, |x, n, out, g| {
            let one = n.scalar_like(1.0);
            let dx = g.try_mul(n)?.try_mul(&x.pow(&n.try_sub(&one)?)?)?;
            let dn = if n.node_id().is_some() {
                Some(g.try_mul(out)?.try_mul(&x.log()?)?)
            } else {
                None
            };
            Ok((Some(dx), dn))
        })
    }

    /// Elementwise power with a constant exponent.
    pub fn powf(&self, exponent: f64) -> Result<Tracked> {
        self.pow(&self.scalar_like(exponent))
    }

    /// Elementwise maximum. Ties route the gradient to `self`.
    pub fn maximum(&self, other: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Maximum, other, |a, b, _, g| {
            let mask = a.value().binary(BinaryOp::GreaterEqual, b.value())?;
            route_by_mask(g, Tracked::new(mask))
        })
    }

    /// Elementwise minimum. Ties route the gradient to `self`.
    pub fn minimum(&self, other: &Tracked) -> Result<Tracked> {
        self.binary_op(BinaryOp::Minimum, other, |a, b, _, g| {
            let mask = a.value().binary(BinaryOp::LessEqual, b.value())?;
            route_by_mask(g, Tracked::new(mask))
        })
    }

    /// Elementwise `1 / self`.
    pub fn reciprocal(&self) -> Result<Tracked> {
        self.scalar_like(1.0).try_div(self)
    }

    /// Clamp every element into `[lo, hi]`.
    ///
    /// The gradient passes where `lo <= x <= hi` and is zero elsewhere.
    pub fn clip(&self, lo: f64, hi: f64) -> Result<Tracked> {
        let x = self.value();
        let (lo, hi) = (x.scalar_like(lo), x.scalar_like(hi));
        let value = x.binary(BinaryOp::Maximum, &lo)?.binary(BinaryOp::Minimum, &hi)?;
        let inside = x
            .binary(BinaryOp::GreaterEqual, &lo)?
            .binary(BinaryOp::Mul, &x.binary(BinaryOp::LessEqual, &hi)?)?;
        let inside = Tracked::new(inside);
        Ok(Tracked::record(value, "clip", &[self], move |_, g| {
            Ok(smallvec![Some(g.try_mul(&inside)?)])
        }))
    }

    /// Pick `on_true` where `self` is nonzero and `on_false` elsewhere,
    /// broadcasting all three.
    ///
    /// `self` acts as a constant mask; each branch receives the upstream
    /// gradient where it was picked.
    ///
    /// ```
    /// use ndgrad::{Tracked, array};
    ///
    /// let x = Tracked::new(array([-1.0, 2.0, -3.0]));
    /// let relu = x.greater(&x.scalar_like(0.0)).unwrap().select(&x, &x.zeros_like());
    /// assert_eq!(relu.unwrap().data(), &[0.0, 2.0, 0.0]);
    /// ```
    #[doc(alias = "where")]
    pub fn select(&self, on_true: &Tracked, on_false: &Tracked) -> Result<Tracked> {
        let value = self.value().select(on_true.value(), on_false.value())?;
        let cond = self.detach();
        let (true_shape, false_shape) = (on_true.shape().to_vec(), on_false.shape().to_vec());
        Ok(Tracked::record(value, "select", &[on_true, on_false], move |_, g| {
            let zeros = g.zeros_like();
            Ok(smallvec![
                Some(cond.select(g, &zeros)?.sum_to_shape(&true_shape)?),
                Some(cond.select(&zeros, g)?.sum_to_shape(&false_shape)?),
            ])
        }))
    }

    fn compare(&self, op: BinaryOp, other: &Tracked) -> Result<Tracked> {
        Ok(Tracked::new(self.value().binary(op, other.value())?))
    }

    /// 0/1 mask of `self > other`. Masks are never traced.
    pub fn greater(&self, other: &Tracked) -> Result<Tracked> {
        self.compare(BinaryOp::Greater, other)
    }

    /// 0/1 mask of `self >= other`.
    pub fn greater_equal(&self, other: &Tracked) -> Result<Tracked> {
        self.compare(BinaryOp::GreaterEqual, other)
    }

    /// 0/1 mask of `self < other`.
    pub fn less(&self, other: &Tracked) -> Result<Tracked> {
        self.compare(BinaryOp::Less, other)
    }

    /// 0/1 mask of `self <= other`.
    pub fn less_equal(&self, other: &Tracked) -> Result<Tracked> {
        self.compare(BinaryOp::LessEqual, other)
    }

    /// 0/1 mask of `self == other`.
    pub fn equal(&self, other: &Tracked) -> Result<Tracked> {
        self.compare(BinaryOp::Equal, other)
    }

    /// Elementwise negation.
    pub fn neg(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Neg, |_, _, g| g.neg())
    }

    /// Elementwise `e^x`.
    pub fn exp(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Exp, |_, out, g| g.try_mul(out))
    }

    /// Elementwise natural logarithm.
    pub fn log(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Log, |x, _, g| g.try_div(x))
    }

    /// Elementwise square root.
    pub fn sqrt(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Sqrt, |_, out, g| {
            g.try_div(&out.try_mul(&out.scalar_like(2.0))?)
        })
    }

    /// Elementwise sine.
    pub fn sin(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Sin, |x, _, g| g.try_mul(&x.cos()?))
    }

    /// Elementwise cosine.
    pub fn cos(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Cos, |x, _, g| g.try_mul(&x.sin()?)?.neg())
    }

    /// Elementwise hyperbolic tangent.
    pub fn tanh(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Tanh, |_, out, g| {
            let one = out.scalar_like(1.0);
            g.try_mul(&one.try_sub(&out.try_mul(out)?)?)
        })
    }

    /// Elementwise absolute value.
    pub fn abs(&self) -> Result<Tracked> {
        self.unary_op(UnaryOp::Abs, |x, _, g| g.try_mul(&x.sign()?))
    }

    /// Elementwise sign (0 at 0). Piecewise constant, so never traced.
    pub fn sign(&self) -> Result<Tracked> {
        Ok(Tracked::new(self.value().unary(UnaryOp::Sign)?))
    }
}

fn route_by_mask(g: &Tracked, mask: Tracked) -> Result<Pair> {
    let rest = mask.scalar_like(1.0).try_sub(&mask)?;
    Ok((Some(g.try_mul(&mask)?), Some(g.try_mul(&rest)?)))
}
