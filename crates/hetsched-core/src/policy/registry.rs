//! Policy lookup by name and startup selection.

use std::collections::BTreeMap;

use tracing::info;

use super::{DequeModelPolicy, EagerPolicy, PrioPolicy, RandomPolicy, SchedPolicy, WorkStealingPolicy};
use crate::config::{SCHED_ENV, SchedConf};
use crate::error::SchedError;

/// Policy used when nothing names one.
pub const DEFAULT_POLICY: &str = "eager";

/// Builds a fresh, uninitialized policy.
pub type PolicyFactory = fn() -> Box<dyn SchedPolicy>;

struct Entry {
    description: &'static str,
    factory: PolicyFactory,
}

/// Name and registry entry for the policies `factory` builds.
fn describe(factory: PolicyFactory) -> (&'static str, Entry) {
    let sample = factory();
    let entry = Entry {
        description: sample.description(),
        factory,
    };
    (sample.name(), entry)
}

/// Registry of policies (name -> factory).
///
/// Design:
/// - Built during initialization (mutable).
/// - Read-only once a scheduler is being built.
pub struct PolicyRegistry {
    entries: BTreeMap<&'static str, Entry>,
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Every built-in policy.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins: [PolicyFactory; 7] = [
            || Box::new(WorkStealingPolicy::new()),
            || Box::new(PrioPolicy::new()),
            || Box::new(EagerPolicy::no_prio()),
            || Box::new(DequeModelPolicy::dm()),
            || Box::new(DequeModelPolicy::dmda()),
            || Box::new(RandomPolicy::new()),
            || Box::new(EagerPolicy::eager()),
        ];
        // 組み込みの名前は重複しない
        registry.entries.extend(builtins.into_iter().map(describe));
        registry
    }

    /// Register a policy under the name its instances report.
    pub fn register(&mut self, factory: PolicyFactory) -> Result<(), SchedError> {
        let (name, entry) = describe(factory);
        if self.entries.contains_key(name) {
            return Err(SchedError::DuplicatePolicy(name.to_string()));
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn SchedPolicy>, SchedError> {
        self.entries
            .get(name)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| SchedError::UnknownPolicy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `name\tdescription` line per policy.
    pub fn help(&self) -> String {
        let mut text = format!("{SCHED_ENV} can be either of\n");
        for (name, entry) in &self.entries {
            text.push_str(&format!("{name}\t{}\n", entry.description));
        }
        text.push_str(&format!("else the {DEFAULT_POLICY} scheduler will be used\n"));
        text
    }

    /// Pick the policy to run, in order: `explicit`, `conf.policy_name`,
    /// the `SCHED` value in `env`, then [`DEFAULT_POLICY`].
    ///
    /// An unknown name is an error, never a silent fallback. The name `help`
    /// logs the list of policies first.
    pub fn select(
        &self,
        explicit: Option<Box<dyn SchedPolicy>>,
        conf: &SchedConf,
        env: Option<&str>,
    ) -> Result<Box<dyn SchedPolicy>, SchedError> {
        let policy = match explicit {
            Some(policy) => policy,
            None => {
                let name = conf.policy_name.as_deref().or(env).unwrap_or(DEFAULT_POLICY);
                if name == "help" {
                    info!("{}", self.help());
                }
                self.create(name)?
            }
        };
        info!("Use {} scheduler ({})", policy.name(), policy.description());
        Ok(policy)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn builtin_names() {
        let registry = PolicyRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["dm", "dmda", "eager", "no-prio", "prio", "random", "ws"]
        );
    }

    #[rstest]
    #[case("eager")]
    #[case("no-prio")]
    #[case("prio")]
    #[case("random")]
    #[case("ws")]
    #[case("dm")]
    #[case("dmda")]
    fn create_returns_the_named_policy(#[case] name: &str) {
        let policy = PolicyRegistry::builtin().create(name).unwrap();
        assert_eq!(policy.name(), name);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = PolicyRegistry::builtin();
        let err = registry
            .register(|| Box::new(PrioPolicy::new()))
            .unwrap_err();
        assert!(matches!(err, SchedError::DuplicatePolicy(name) if name == "prio"));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = PolicyRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.create("eager"),
            Err(SchedError::UnknownPolicy(_))
        ));
    }

    #[rstest]
    #[case(None, None, "eager")]
    #[case(None, Some("ws"), "ws")]
    #[case(Some("prio"), Some("ws"), "prio")]
    #[case(Some("dm"), None, "dm")]
    fn selection_order(#[case] conf_name: Option<&str>, #[case] env: Option<&str>, #[case] expected: &str) {
        let conf = SchedConf {
            policy_name: conf_name.map(str::to_string),
            ..SchedConf::default()
        };
        let policy = PolicyRegistry::builtin().select(None, &conf, env).unwrap();
        assert_eq!(policy.name(), expected);
    }

    #[test]
    fn explicit_object_wins() {
        let conf = SchedConf::default().with_policy("prio");
        let policy = PolicyRegistry::builtin()
            .select(Some(Box::new(RandomPolicy::new())), &conf, Some("ws"))
            .unwrap();
        assert_eq!(policy.name(), "random");
    }

    #[rstest]
    #[case(Some("fifo"), None)]
    #[case(None, Some("help"))]
    fn unknown_names_are_fatal(#[case] conf_name: Option<&str>, #[case] env: Option<&str>) {
        let conf = SchedConf {
            policy_name: conf_name.map(str::to_string),
            ..SchedConf::default()
        };
        let selected = PolicyRegistry::builtin().select(None, &conf, env);
        assert!(matches!(selected, Err(SchedError::UnknownPolicy(_))));
    }

    #[test]
    fn help_lists_every_policy() {
        let help = PolicyRegistry::builtin().help();
        assert!(help.starts_with("SCHED can be either of"));
        assert!(help.contains("ws\twork stealing\n"));
        assert!(help.contains("dmda\tdata-aware performance model\n"));
        assert!(help.ends_with("else the eager scheduler will be used\n"));
    }
}
