use super::Node;
use super::Tensor;

/// Element-wise sum of any number of equally sized inputs. Joins the two
/// paths of a residual block.
#[derive(Default)]
pub struct Add {}

impl Add {
    pub fn new() -> Self {
        Add {}
    }
}

impl Node for Add {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        inputs.iter().map(|_| grad.clone()).collect()
    }

    fn call(&mut self, inputs: Vec<Tensor>) -> Tensor {
        let mut iter = inputs.into_iter();
        let Some(mut out) = iter.next() else {
            return Tensor::null();
        };
        for other in iter {
            assert_eq!(
                out.shape, other.shape,
                "Add operands differ: {:?} vs {:?}",
                out.shape, other.shape
            );
            out += other;
        }
        out
    }
}
