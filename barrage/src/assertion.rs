//! Pluggable response assertions.
//!
//! An [`Assertion`] is fed an *input* and a *test* value and then evaluated.
//! What input and test mean depends on the assertion: `body-contains` looks for
//! the test substring in the input body, `status-in-set` looks for the test
//! status in the input set of accepted codes.
//!
//! Assertions are created by name through an [`AssertionRegistry`] and grouped
//! per target in an [`AssertionManager`]. Workers clone the manager for every
//! request so concurrent requests never share assertion state.

use std::collections::BTreeMap;
use std::fmt::Debug;

use bytes::Bytes;
use thiserror::Error;

pub const BODY_CONTAINS: &str = "body-contains";
pub const STATUS_IN_SET: &str = "status-in-set";

/// Codes accepted by `status-in-set` unless configured otherwise.
pub const DEFAULT_ACCEPTED_STATUSES: [u16; 2] = [200, 201];

/// Input and test values handed to assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionValue {
    Text(String),
    Bytes(Bytes),
    Status(u16),
    StatusSet(Vec<u16>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssertionError {
    #[error("assertion `{assertion}` expects {expected}")]
    InvalidValue {
        assertion: &'static str,
        expected: &'static str,
    },
    #[error("assertion `{name}` failed: {reason}")]
    Failed { name: &'static str, reason: String },
    #[error("no assertion specified")]
    NoneSpecified,
    #[error("none of the given assertions have been registered")]
    NoneRegistered,
    #[error("assertion `{0}` is not registered")]
    NotRegistered(String),
    #[error("unknown assertion `{0}`")]
    Unknown(String),
}

/// What a worker observed for one response.
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub status: u16,
    /// Present when some assertion asked for it or the target extracts variables.
    pub body: Option<&'a Bytes>,
}

pub trait Assertion: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Whether [`Assertion::observe`] needs the response body.
    fn reads_body(&self) -> bool {
        false
    }

    /// Take whatever this assertion checks from the response. The default
    /// takes nothing, which suits assertions fed through `set_input` and
    /// `set_test` ahead of time.
    fn observe(&mut self, observed: &Observed<'_>) -> Result<(), AssertionError> {
        let _ = observed;
        Ok(())
    }

    fn set_input(&mut self, input: AssertionValue) -> Result<(), AssertionError>;

    fn set_test(&mut self, test: AssertionValue) -> Result<(), AssertionError>;

    /// `Ok(())` on pass, [`AssertionError::Failed`] otherwise.
    fn evaluate(&self) -> Result<(), AssertionError>;

    fn box_clone(&self) -> Box<dyn Assertion>;
}

impl Clone for Box<dyn Assertion> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Passes when the response body contains the configured substring.
#[derive(Debug, Clone, Default)]
pub struct BodyContains {
    input: String,
    test: String,
}

impl BodyContains {
    pub fn new(substring: impl Into<String>) -> Self {
        Self {
            input: String::new(),
            test: substring.into(),
        }
    }
}

impl Assertion for BodyContains {
    fn name(&self) -> &'static str {
        BODY_CONTAINS
    }

    fn reads_body(&self) -> bool {
        true
    }

    fn observe(&mut self, observed: &Observed<'_>) -> Result<(), AssertionError> {
        match observed.body {
            Some(body) => self.set_input(AssertionValue::Bytes(body.clone())),
            None => Err(AssertionError::InvalidValue {
                assertion: BODY_CONTAINS,
                expected: "a response body",
            }),
        }
    }

    fn set_input(&mut self, input: AssertionValue) -> Result<(), AssertionError> {
        self.input = match input {
            AssertionValue::Text(text) => text,
            AssertionValue::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => {
                return Err(AssertionError::InvalidValue {
                    assertion: BODY_CONTAINS,
                    expected: "a text or bytes input",
                });
            }
        };
        Ok(())
    }

    fn set_test(&mut self, test: AssertionValue) -> Result<(), AssertionError> {
        match test {
            AssertionValue::Text(text) => {
                self.test = text;
                Ok(())
            }
            _ => Err(AssertionError::InvalidValue {
                assertion: BODY_CONTAINS,
                expected: "a text test value",
            }),
        }
    }

    fn evaluate(&self) -> Result<(), AssertionError> {
        if self.input.contains(&self.test) {
            Ok(())
        } else {
            Err(AssertionError::Failed {
                name: BODY_CONTAINS,
                reason: format!("body does not contain {:?}", self.test),
            })
        }
    }

    fn box_clone(&self) -> Box<dyn Assertion> {
        Box::new(self.clone())
    }
}

/// Passes when the observed status is one of the accepted codes.
#[derive(Debug, Clone)]
pub struct StatusInSet {
    input: Vec<u16>,
    test: Option<u16>,
}

impl Default for StatusInSet {
    fn default() -> Self {
        Self {
            input: DEFAULT_ACCEPTED_STATUSES.to_vec(),
            test: None,
        }
    }
}

impl StatusInSet {
    pub fn new(accepted: impl IntoIterator<Item = u16>) -> Self {
        Self {
            input: accepted.into_iter().collect(),
            test: None,
        }
    }

    /// Parse a comma separated list (`"200, 204"`). Blank means the defaults.
    pub fn parse(accepted: &str) -> Result<Self, AssertionError> {
        if accepted.trim().is_empty() {
            return Ok(Self::default());
        }
        accepted
            .split(',')
            .map(|code| code.trim().parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
            .map_err(|_| AssertionError::InvalidValue {
                assertion: STATUS_IN_SET,
                expected: "a comma separated list of status codes",
            })
    }
}

impl Assertion for StatusInSet {
    fn name(&self) -> &'static str {
        STATUS_IN_SET
    }

    fn observe(&mut self, observed: &Observed<'_>) -> Result<(), AssertionError> {
        self.set_test(AssertionValue::Status(observed.status))
    }

    fn set_input(&mut self, input: AssertionValue) -> Result<(), AssertionError> {
        match input {
            AssertionValue::StatusSet(codes) => {
                self.input = codes;
                Ok(())
            }
            _ => Err(AssertionError::InvalidValue {
                assertion: STATUS_IN_SET,
                expected: "a set of status codes as input",
            }),
        }
    }

    fn set_test(&mut self, test: AssertionValue) -> Result<(), AssertionError> {
        match test {
            AssertionValue::Status(code) => {
                self.test = Some(code);
                Ok(())
            }
            _ => Err(AssertionError::InvalidValue {
                assertion: STATUS_IN_SET,
                expected: "a status code as test value",
            }),
        }
    }

    fn evaluate(&self) -> Result<(), AssertionError> {
        match self.test {
            Some(code) if self.input.contains(&code) => Ok(()),
            Some(code) => Err(AssertionError::Failed {
                name: STATUS_IN_SET,
                reason: format!("status {code} is not one of {:?}", self.input),
            }),
            None => Err(AssertionError::Failed {
                name: STATUS_IN_SET,
                reason: "no status to test".to_string(),
            }),
        }
    }

    fn box_clone(&self) -> Box<dyn Assertion> {
        Box::new(self.clone())
    }
}

/// Builds an assertion from its configured expected value.
pub type AssertionFactory = fn(&str) -> Result<Box<dyn Assertion>, AssertionError>;

/// Name → factory table. Construct one per process and hand it to whoever
/// turns configuration into assertions.
#[derive(Debug, Clone)]
pub struct AssertionRegistry {
    factories: BTreeMap<String, AssertionFactory>,
}

impl Default for AssertionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AssertionRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(BODY_CONTAINS, |expected| {
            Ok(Box::new(BodyContains::new(expected)))
        });
        registry.register(STATUS_IN_SET, |expected| {
            Ok(Box::new(StatusInSet::parse(expected)?))
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: AssertionFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn build(&self, name: &str, expected: &str) -> Result<Box<dyn Assertion>, AssertionError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AssertionError::Unknown(name.to_string()))?;
        factory(expected)
    }

    /// Manager holding the enabled assertions plus the defaults.
    pub fn manager_for(
        &self,
        enabled: &BTreeMap<String, String>,
    ) -> Result<AssertionManager, AssertionError> {
        let assertions = enabled
            .iter()
            .map(|(name, expected)| Ok((name.clone(), self.build(name, expected)?)))
            .collect::<Result<BTreeMap<_, _>, AssertionError>>()?;
        Ok(AssertionManager::with_defaults(assertions))
    }
}

/// Named assertions of one target.
#[derive(Debug, Clone, Default)]
pub struct AssertionManager {
    assertions: BTreeMap<String, Box<dyn Assertion>>,
}

impl AssertionManager {
    pub fn new(assertions: BTreeMap<String, Box<dyn Assertion>>) -> Self {
        Self { assertions }
    }

    /// Like [`AssertionManager::new`], adding `status-in-set` with the default
    /// accepted codes unless it is already present.
    pub fn with_defaults(mut assertions: BTreeMap<String, Box<dyn Assertion>>) -> Self {
        assertions
            .entry(STATUS_IN_SET.to_string())
            .or_insert_with(|| Box::new(StatusInSet::default()));
        Self { assertions }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.assertions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Assertion> {
        self.assertions.get(name).map(|a| a.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Assertion>> {
        self.assertions.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.assertions.keys().map(String::as_str)
    }

    pub fn set_input(&mut self, name: &str, input: AssertionValue) -> Result<(), AssertionError> {
        self.get_mut(name)
            .ok_or_else(|| AssertionError::NotRegistered(name.to_string()))?
            .set_input(input)
    }

    pub fn set_test(&mut self, name: &str, test: AssertionValue) -> Result<(), AssertionError> {
        self.get_mut(name)
            .ok_or_else(|| AssertionError::NotRegistered(name.to_string()))?
            .set_test(test)
    }

    /// Whether any assertion wants the response body.
    pub fn needs_body(&self) -> bool {
        self.assertions.values().any(|a| a.reads_body())
    }

    /// Hand the response to every assertion. All of them see it even when
    /// one rejects it; the first rejection is returned.
    pub fn observe(&mut self, observed: &Observed<'_>) -> Result<(), AssertionError> {
        let mut first_error = None;
        for assertion in self.assertions.values_mut() {
            if let Err(e) = assertion.observe(observed) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Evaluate every assertion, `status-in-set` first and the rest by name,
    /// stopping at the first failure.
    pub fn run_all(&self) -> Result<(), AssertionError> {
        if self.assertions.is_empty() {
            return Err(AssertionError::NoneRegistered);
        }
        let status = self.get(STATUS_IN_SET);
        let rest = self
            .assertions
            .iter()
            .filter(|(name, _)| name.as_str() != STATUS_IN_SET)
            .map(|(_, a)| a.as_ref());
        for assertion in status.into_iter().chain(rest) {
            assertion.evaluate()?;
        }
        Ok(())
    }

    pub fn run_one(&self, name: &str) -> Result<(), AssertionError> {
        self.get(name)
            .ok_or_else(|| AssertionError::NotRegistered(name.to_string()))?
            .evaluate()
    }

    /// Evaluate the registered assertions among `names`, in order, stopping at
    /// the first failure. Unregistered names are skipped, but at least one
    /// of them has to be registered.
    pub fn run(&self, names: &[&str]) -> Result<(), AssertionError> {
        if names.is_empty() {
            return Err(AssertionError::NoneSpecified);
        }

        let mut any_registered = false;
        for assertion in names.iter().filter_map(|name| self.get(name)) {
            any_registered = true;
            assertion.evaluate()?;
        }

        if any_registered {
            Ok(())
        } else {
            Err(AssertionError::NoneRegistered)
        }
    }
}
