use crate::error::{GraphormerError, Result};
use crate::GraphormerFloat;
use dyn_clone::DynClone;
use log::warn;
use ndarray::ArrayViewMutD;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Elementwise nonlinearity. Boxed activations serialise with their `type` tag.
#[typetag::serde(tag = "type")]
pub trait Activation: DynClone + Display + Debug + Send + Sync {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat;

    fn apply_inplace(&self, mut x: ArrayViewMutD<GraphormerFloat>) {
        x.mapv_inplace(|v| self.apply(v));
    }
}

dyn_clone::clone_trait_object!(Activation);

/// Resolves an activation by its configuration name.
///
/// # Errors
/// `UnknownActivation` for names outside the supported set.
pub fn get_activation_fn(name: &str) -> Result<Box<dyn Activation>> {
    match name {
        "relu" => Ok(Box::new(ReLU {})),
        "relu_squared" => Ok(Box::new(ReLUSquared {})),
        "gelu" => Ok(Box::new(Gelu {})),
        "gelu_fast" => {
            warn!("--activation-fn=gelu_fast has been renamed to gelu_accurate");
            Ok(Box::new(GeluAccurate {}))
        }
        "gelu_accurate" => Ok(Box::new(GeluAccurate {})),
        "tanh" => Ok(Box::new(Tanh {})),
        "linear" => Ok(Box::new(Identity {})),
        "swish" => Ok(Box::new(Swish {})),
        other => Err(GraphormerError::UnknownActivation(other.to_string())),
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReLU {}

#[typetag::serde]
impl Activation for ReLU {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        if x.lt(&0.) {
            0.
        } else {
            x
        }
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "ReLU")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReLUSquared {}

#[typetag::serde]
impl Activation for ReLUSquared {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        let r = x.max(0.);
        r * r
    }
}

impl Display for ReLUSquared {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "ReLUSquared")
    }
}

/// Exact GELU, `x * Φ(x)`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Gelu {}

#[typetag::serde]
impl Activation for Gelu {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        0.5 * x * (1. + libm::erf(x * FRAC_1_SQRT_2))
    }
}

impl Display for Gelu {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "GELU")
    }
}

/// Tanh approximation of GELU.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct GeluAccurate {}

#[typetag::serde]
impl Activation for GeluAccurate {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        let c = (2. / PI).sqrt();
        0.5 * x * (1. + (c * (x + 0.044_715 * x.powi(3))).tanh())
    }
}

impl Display for GeluAccurate {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "GELU (tanh)")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Tanh {}

#[typetag::serde]
impl Activation for Tanh {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        x.tanh()
    }
}

impl Display for Tanh {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "Tanh")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Identity {}

#[typetag::serde]
impl Activation for Identity {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        x
    }

    fn apply_inplace(&self, _x: ArrayViewMutD<GraphormerFloat>) {}
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "Linear")
    }
}

/// `x * sigmoid(x)`
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Swish {}

#[typetag::serde]
impl Activation for Swish {
    fn apply(&self, x: GraphormerFloat) -> GraphormerFloat {
        x / (1. + (-x).exp())
    }
}

impl Display for Swish {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "Swish")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use ndarray::arr1;
    use proptest::prelude::*;

    #[test]
    fn test_lookup_by_name() {
        for name in [
            "relu",
            "relu_squared",
            "gelu",
            "gelu_fast",
            "gelu_accurate",
            "tanh",
            "linear",
            "swish",
        ] {
            assert!(get_activation_fn(name).is_ok(), "{}", name);
        }
        assert!(matches!(
            get_activation_fn("softsign"),
            Err(GraphormerError::UnknownActivation(_))
        ));
    }

    #[test]
    fn test_relu_inplace() {
        let mut x = arr1(&[-1., 0., 2.]).into_dyn();
        ReLU {}.apply_inplace(x.view_mut());
        assert_eq!(x, arr1(&[0., 0., 2.]).into_dyn());
    }

    #[test]
    fn test_gelu_known_values() {
        assert!(approx_eq!(f64, Gelu {}.apply(1.), 0.841_344_746_068_542_9, epsilon = 1e-12));
        assert!(approx_eq!(f64, Gelu {}.apply(-1.), -0.158_655_253_931_457_05, epsilon = 1e-12));
        assert!(approx_eq!(f64, Gelu {}.apply(0.3), 0.185_373_426_656_685_77, epsilon = 1e-12));
        assert!(approx_eq!(f64, GeluAccurate {}.apply(1.), 0.841_191_990, epsilon = 1e-6));
    }

    #[test]
    fn test_boxed_activation_round_trips_through_json() {
        let act = get_activation_fn("gelu").unwrap();
        let json = serde_json::to_string(&act).unwrap();
        let back: Box<dyn Activation> = serde_json::from_str(&json).unwrap();
        assert_eq!(format!("{}", back), "GELU");
    }

    proptest! {
        #[test]
        fn test_gelu_variants_agree(x in -6f64..6.) {
            let gap = Gelu {}.apply(x) - GeluAccurate {}.apply(x);
            prop_assert!(gap.abs() < 1e-3);
        }
    }
}
