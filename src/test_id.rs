//! Composite test identifiers
//!
//! Every node in the discovery tree carries a colon-delimited id whose
//! first field names the node kind and whose remaining fields encode its
//! lineage (target, parameter value, test case name). The colon string is
//! the external identity of a test: ids are compared as strings across
//! tree rebuilds. Internally the six kinds are an explicit sum type so
//! command synthesis cannot mix up field positions.

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

/// A parsed test node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum TestId {
    /// Grouping node for one build target; runnable directly when it has
    /// no children.
    Simulation { target: String },
    /// One parameter-set variant of a target.
    Params { value: String, target: String },
    /// A generator-produced case with no parameters.
    GeneratorCase { target: String, case: String },
    /// A generator-produced case under a parameter variant.
    ParamGeneratorCase {
        target: String,
        param: String,
        case: String,
    },
    /// A bench-defined case with no parameters.
    BenchCase { target: String, case: String },
    /// A bench-defined case under a parameter variant.
    ParamBenchCase {
        target: String,
        param: String,
        case: String,
    },
}

impl TestId {
    /// Parse a colon-delimited id string.
    ///
    /// Field positions are fixed per kind; note that `params` carries its
    /// value *before* the target, unlike every other kind.
    pub fn parse(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        let id = match (fields[0], fields.len()) {
            ("simulation", 2) => TestId::Simulation {
                target: fields[1].to_string(),
            },
            ("params", 3) => TestId::Params {
                value: fields[1].to_string(),
                target: fields[2].to_string(),
            },
            ("testCaseGenerator", 3) => TestId::GeneratorCase {
                target: fields[1].to_string(),
                case: fields[2].to_string(),
            },
            ("paramsTestCaseGenerator", 4) => TestId::ParamGeneratorCase {
                target: fields[1].to_string(),
                param: fields[2].to_string(),
                case: fields[3].to_string(),
            },
            ("testBench", 3) => TestId::BenchCase {
                target: fields[1].to_string(),
                case: fields[2].to_string(),
            },
            ("paramsTestBench", 4) => TestId::ParamBenchCase {
                target: fields[1].to_string(),
                param: fields[2].to_string(),
                case: fields[3].to_string(),
            },
            (tag, n) => bail!("unrecognized test id '{}' (tag '{}', {} fields)", s, tag, n),
        };
        Ok(id)
    }

    /// The kind tag, i.e. the first field of the colon form.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            TestId::Simulation { .. } => "simulation",
            TestId::Params { .. } => "params",
            TestId::GeneratorCase { .. } => "testCaseGenerator",
            TestId::ParamGeneratorCase { .. } => "paramsTestCaseGenerator",
            TestId::BenchCase { .. } => "testBench",
            TestId::ParamBenchCase { .. } => "paramsTestBench",
        }
    }

    /// The build target this node belongs to.
    pub fn target(&self) -> &str {
        match self {
            TestId::Simulation { target }
            | TestId::Params { target, .. }
            | TestId::GeneratorCase { target, .. }
            | TestId::ParamGeneratorCase { target, .. }
            | TestId::BenchCase { target, .. }
            | TestId::ParamBenchCase { target, .. } => target,
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestId::Simulation { target } => write!(f, "simulation:{}", target),
            TestId::Params { value, target } => write!(f, "params:{}:{}", value, target),
            TestId::GeneratorCase { target, case } => {
                write!(f, "testCaseGenerator:{}:{}", target, case)
            }
            TestId::ParamGeneratorCase {
                target,
                param,
                case,
            } => write!(f, "paramsTestCaseGenerator:{}:{}:{}", target, param, case),
            TestId::BenchCase { target, case } => write!(f, "testBench:{}:{}", target, case),
            TestId::ParamBenchCase {
                target,
                param,
                case,
            } => write!(f, "paramsTestBench:{}:{}:{}", target, param, case),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_kinds() {
        assert_eq!(
            TestId::parse("simulation:chip").unwrap(),
            TestId::Simulation {
                target: "chip".into()
            }
        );
        assert_eq!(
            TestId::parse("params:8:chip").unwrap(),
            TestId::Params {
                value: "8".into(),
                target: "chip".into()
            }
        );
        assert_eq!(
            TestId::parse("testCaseGenerator:chip:smoke").unwrap(),
            TestId::GeneratorCase {
                target: "chip".into(),
                case: "smoke".into()
            }
        );
        assert_eq!(
            TestId::parse("paramsTestCaseGenerator:chip:8:smoke").unwrap(),
            TestId::ParamGeneratorCase {
                target: "chip".into(),
                param: "8".into(),
                case: "smoke".into()
            }
        );
        assert_eq!(
            TestId::parse("testBench:chip:basic").unwrap(),
            TestId::BenchCase {
                target: "chip".into(),
                case: "basic".into()
            }
        );
        assert_eq!(
            TestId::parse("paramsTestBench:chip:16:basic").unwrap(),
            TestId::ParamBenchCase {
                target: "chip".into(),
                param: "16".into(),
                case: "basic".into()
            }
        );
    }

    #[test]
    fn test_round_trip() {
        for s in [
            "simulation:chip",
            "params:width=8:chip",
            "testCaseGenerator:chip:smoke",
            "paramsTestCaseGenerator:chip:8:full",
            "testBench:chip:basic",
            "paramsTestBench:chip:16:basic",
        ] {
            assert_eq!(TestId::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_params_field_order() {
        // params ids carry the value before the target
        let id = TestId::parse("params:16:chip").unwrap();
        assert_eq!(id.target(), "chip");
        match id {
            TestId::Params { value, .. } => assert_eq!(value, "16"),
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(TestId::parse("bogus:chip").is_err());
        assert!(TestId::parse("simulation").is_err());
        assert!(TestId::parse("params:8").is_err());
        assert!(TestId::parse("testBench:chip:case:extra").is_err());
    }

    #[test]
    fn test_target_for_every_kind() {
        for s in [
            "simulation:chip",
            "params:8:chip",
            "testCaseGenerator:chip:smoke",
            "paramsTestCaseGenerator:chip:8:smoke",
            "testBench:chip:basic",
            "paramsTestBench:chip:8:basic",
        ] {
            assert_eq!(TestId::parse(s).unwrap().target(), "chip");
        }
    }
}
