//! Property-Based Tests for container-bootstrap
//!
//! Uses proptest for testing invariants and edge cases
//!
//! These tests verify:
//! - Enum string round-trips (parse → to_string → parse)
//! - Username and password validation boundaries
//! - Shell quoting
//! - Secrets never reaching argv or logs
//! - Plan shape per variant

use proptest::prelude::*;

use container_bootstrap::command_traits::shell_quote;
use container_bootstrap::config::{validate_password, validate_user};
use container_bootstrap::{
    Bootstrap, BootstrapConfig, BootstrapSettings, BootstrapStage, HandoffMode, RecordingExecutor,
    SetPasswordArgs, SetupFailurePolicy, SystemCommand, Variant,
};

// =============================================================================
// Enum Property Tests
// =============================================================================

fn variant_strategy() -> impl Strategy<Value = Variant> {
    prop_oneof![Just(Variant::Workspace), Just(Variant::Docker)]
}

fn policy_strategy() -> impl Strategy<Value = SetupFailurePolicy> {
    prop_oneof![
        Just(SetupFailurePolicy::Ignore),
        Just(SetupFailurePolicy::Abort),
    ]
}

fn handoff_strategy() -> impl Strategy<Value = HandoffMode> {
    prop_oneof![Just(HandoffMode::Supervise), Just(HandoffMode::Exec)]
}

proptest! {
    /// Variant: to_string → parse round-trip is identity
    #[test]
    fn variant_roundtrip(v in variant_strategy()) {
        let parsed: Variant = v.to_string().parse().expect("Should parse");
        prop_assert_eq!(v, parsed);
    }

    /// SetupFailurePolicy: to_string → parse round-trip is identity
    #[test]
    fn policy_roundtrip(p in policy_strategy()) {
        let parsed: SetupFailurePolicy = p.to_string().parse().expect("Should parse");
        prop_assert_eq!(p, parsed);
    }

    /// HandoffMode: Display output is non-empty lowercase
    #[test]
    fn handoff_display_is_valid(m in handoff_strategy()) {
        let s = m.to_string();
        prop_assert!(!s.is_empty());
        prop_assert_eq!(s.to_lowercase(), s);
    }
}

// =============================================================================
// Validation Property Tests
// =============================================================================

proptest! {
    /// Portable login names are accepted
    #[test]
    fn portable_usernames_accepted(name in "[a-z_][a-z0-9_-]{0,31}") {
        prop_assert!(validate_user(&name).is_ok());
    }

    /// Names starting with a digit or uppercase letter are rejected
    #[test]
    fn bad_leading_char_rejected(name in "[0-9A-Z][a-z0-9_-]{0,20}") {
        prop_assert!(validate_user(&name).is_err());
    }

    /// Names longer than 32 characters are rejected
    #[test]
    fn long_usernames_rejected(name in "[a-z][a-z0-9]{32,48}") {
        prop_assert!(validate_user(&name).is_err());
    }

    /// Any printable ASCII password is accepted
    #[test]
    fn printable_passwords_accepted(pw in "[ -~]{1,64}") {
        prop_assert!(validate_password(&pw).is_ok());
    }

    /// Newlines would split the chpasswd record and are rejected
    #[test]
    fn multiline_passwords_rejected(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
        let pw = format!("{}\n{}", a, b);
        prop_assert!(validate_password(&pw).is_err());
    }
}

// =============================================================================
// Shell Quoting Property Tests
// =============================================================================

proptest! {
    /// Safe strings pass through unchanged
    #[test]
    fn safe_strings_unquoted(s in "[a-zA-Z0-9@%+=:,./_-]{1,40}") {
        prop_assert_eq!(shell_quote(&s), s);
    }

    /// Anything with a space is single-quoted
    #[test]
    fn strings_with_spaces_quoted(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
        let quoted = shell_quote(&format!("{} {}", a, b));
        prop_assert!(quoted.starts_with('\''));
        prop_assert!(quoted.ends_with('\''));
    }

    /// Stripping the `'\''` escapes and outer quotes recovers the input
    #[test]
    fn quoting_is_reversible(s in "[ -~]{1,40}") {
        let quoted = shell_quote(&s);
        if quoted != s {
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace(r"'\''", "'"), s);
        }
    }
}

// =============================================================================
// Secret Handling Property Tests
// =============================================================================

proptest! {
    /// The password appears only in the stdin payload
    #[test]
    fn password_never_in_argv_or_display(
        user in "[a-z][a-z0-9]{2,10}",
        password in "[A-Za-z0-9!#$%]{8,24}",
    ) {
        let args = SetPasswordArgs { user: user.clone(), password: password.clone() };

        let debug = format!("{:?}", args);
        prop_assert!(!args.display().contains(&password));
        prop_assert!(!debug.contains(&password));
        prop_assert!(args.to_cli_args().iter().all(|a| !a.contains(&password)));
        prop_assert_eq!(args.stdin_payload(), Some(format!("{}:{}\n", user, password)));
    }
}

// =============================================================================
// Plan Property Tests
// =============================================================================

proptest! {
    /// Every valid user gets the same step sequence for a variant
    #[test]
    fn plan_shape_depends_only_on_variant(
        user in "[a-z][a-z0-9_]{0,15}",
        variant in variant_strategy(),
    ) {
        let config = BootstrapConfig::new(&user, "pw", None).expect("valid config");
        let bootstrap = Bootstrap::new(config, BootstrapSettings::default(), variant).dry_run(true);
        let mut recorder = RecordingExecutor::new();

        let report = bootstrap.run(&mut recorder).expect("plan should succeed");

        let expected = match variant {
            Variant::Workspace => vec!["useradd", "chpasswd", "usermod", "su"],
            Variant::Docker => vec!["groupadd", "useradd", "chpasswd", "usermod", "su"],
        };
        prop_assert_eq!(recorder.programs(), expected);
        prop_assert_eq!(report.stages.last(), Some(&BootstrapStage::ReadyForHandoff));

        // Every account command names the user as its last argument
        for cmd in &recorder.commands()[..recorder.commands().len() - 1] {
            if cmd.program == "useradd" || cmd.program == "usermod" {
                prop_assert_eq!(cmd.args.last(), Some(&user));
            }
        }
    }
}
