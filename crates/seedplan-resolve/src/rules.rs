use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use seedplan_core::{ConstraintKind, TableConstraint};

use crate::model::{
    DependencyOperation, OperationKind, Record, RecordModification, ResolverOptions, placeholder,
};
use crate::scan::base_table;

/// Everything a rule may look at for one constraint of one record.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub table: &'a str,
    pub record: &'a Record,
    pub constraint: &'a TableConstraint,
    pub options: &'a ResolverOptions,
    pub now: DateTime<Utc>,
}

impl<'a> RuleInput<'a> {
    /// Field value, treating JSON `null` as absent.
    pub fn field(&self, name: &str) -> Option<&'a Value> {
        self.record.get(name).filter(|value| !value.is_null())
    }

    pub fn text(&self, name: &str) -> Option<&'a str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn is_table(&self, name: &str) -> bool {
        base_table(self.table).eq_ignore_ascii_case(name)
    }

    /// Constraint name or predicate mentions `keyword`.
    pub fn mentions(&self, keyword: &str) -> bool {
        self.constraint.searchable_text().contains(keyword)
    }

    pub fn record_id(&self) -> String {
        match self.field("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => "new".to_string(),
        }
    }

    fn modification(
        &self,
        field: &str,
        new_value: Value,
        reason: impl Into<String>,
        confidence: f64,
    ) -> RecordModification {
        RecordModification {
            table: self.table.to_string(),
            record_id: self.record_id(),
            field: field.to_string(),
            old_value: self.record.get(field).cloned().unwrap_or(Value::Null),
            new_value,
            reason: reason.into(),
            confidence,
        }
    }
}

/// What a rule contributes for one constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub operations: Vec<DependencyOperation>,
    pub modifications: Vec<RecordModification>,
    pub warnings: Vec<String>,
}

/// A known multi-table constraint pattern.
///
/// `applies` decides whether the rule matches, `requires` lists the tables
/// the constraint then depends on and `handler` derives the records and
/// field fixes needed to satisfy it.
#[derive(Clone, Copy)]
pub struct DependencyRule {
    pub name: &'static str,
    pub applies: fn(&RuleInput<'_>) -> bool,
    pub requires: fn(&RuleInput<'_>) -> Vec<String>,
    pub handler: fn(&RuleInput<'_>) -> RuleOutcome,
}

impl fmt::Debug for DependencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DependencyRule {
    /// Run the handler and tag produced operations with the rule name.
    pub fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let mut outcome = (self.handler)(input);
        for operation in &mut outcome.operations {
            operation.rule = self.name.to_string();
        }
        outcome
    }
}

/// Built-in rules, generic foreign keys first.
pub fn default_rules() -> Vec<DependencyRule> {
    vec![
        DependencyRule {
            name: "foreign_key_parent",
            applies: foreign_key_applies,
            requires: foreign_key_requires,
            handler: foreign_key_handler,
        },
        DependencyRule {
            name: "team_account_requires_organization",
            applies: team_account_applies,
            requires: team_account_requires,
            handler: team_account_handler,
        },
        DependencyRule {
            name: "account_requires_owner_membership",
            applies: account_owner_applies,
            requires: account_owner_requires,
            handler: account_owner_handler,
        },
        DependencyRule {
            name: "organization_requires_owner_membership",
            applies: organization_owner_applies,
            requires: organization_owner_requires,
            handler: organization_owner_handler,
        },
        DependencyRule {
            name: "auth_principal_requires_profile",
            applies: principal_profile_applies,
            requires: principal_profile_requires,
            handler: principal_profile_handler,
        },
        DependencyRule {
            name: "subscription_matches_account_type",
            applies: subscription_applies,
            requires: subscription_requires,
            handler: subscription_handler,
        },
        DependencyRule {
            name: "invitation_defaults",
            applies: invitation_applies,
            requires: no_tables,
            handler: invitation_handler,
        },
    ]
}

fn no_tables(_: &RuleInput<'_>) -> Vec<String> {
    Vec::new()
}

fn owner_id(input: &RuleInput<'_>) -> Value {
    ["owner_id", "user_id", "created_by"]
        .iter()
        .find_map(|field| input.field(field).cloned())
        .unwrap_or(Value::Null)
}

fn missing_fk_columns<'a>(input: &RuleInput<'a>) -> Vec<(&'a str, &'a str)> {
    let constraint = input.constraint;
    constraint
        .columns
        .iter()
        .enumerate()
        .filter(|(_, column)| input.field(column).is_none())
        .map(|(position, column)| {
            let referenced = constraint
                .referenced_columns
                .get(position)
                .map(String::as_str)
                .unwrap_or("id");
            (column.as_str(), referenced)
        })
        .collect()
}

fn foreign_key_applies(input: &RuleInput<'_>) -> bool {
    let constraint = input.constraint;
    constraint.kind == ConstraintKind::ForeignKey
        && constraint
            .referenced_table
            .as_deref()
            .is_some_and(|target| base_table(target) != base_table(input.table))
        && !missing_fk_columns(input).is_empty()
}

fn foreign_key_requires(input: &RuleInput<'_>) -> Vec<String> {
    input.constraint.referenced_table.iter().cloned().collect()
}

fn foreign_key_handler(input: &RuleInput<'_>) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let Some(target) = input.constraint.referenced_table.as_deref() else {
        return outcome;
    };

    outcome.operations.push(DependencyOperation::new(
        OperationKind::Create,
        target,
        Record::new(),
        format!("foreign key {} requires a {target} row", input.constraint.name),
        10,
    ));
    for (column, referenced) in missing_fk_columns(input) {
        outcome.modifications.push(input.modification(
            column,
            Value::String(placeholder(target, referenced)),
            format!("reference the {target} row created for {}", input.constraint.name),
            0.8,
        ));
    }
    outcome
}

fn is_team_account(input: &RuleInput<'_>) -> bool {
    ["account_type", "type", "kind"]
        .iter()
        .find_map(|field| input.text(field))
        .is_some_and(|kind| kind.eq_ignore_ascii_case("team"))
}

fn team_account_applies(input: &RuleInput<'_>) -> bool {
    input.is_table("accounts")
        && is_team_account(input)
        && input.field("organization_id").is_none()
        && (input.mentions("organization") || input.mentions("team"))
}

fn team_account_requires(_: &RuleInput<'_>) -> Vec<String> {
    vec!["organizations".to_string(), "organization_members".to_string()]
}

fn team_account_handler(input: &RuleInput<'_>) -> RuleOutcome {
    let owner = owner_id(input);
    let name = input
        .text("name")
        .map(|name| format!("{name} Organization"))
        .unwrap_or_else(|| "Team Organization".to_string());

    let mut organization = Record::new();
    organization.insert("name".to_string(), Value::String(name));
    organization.insert("owner_id".to_string(), owner.clone());

    let mut outcome = RuleOutcome {
        operations: vec![DependencyOperation::new(
            OperationKind::Create,
            "organizations",
            organization,
            "team accounts belong to an organization",
            10,
        )],
        modifications: vec![input.modification(
            "organization_id",
            Value::String(placeholder("organizations", "id")),
            "attach the team account to its new organization",
            0.9,
        )],
        warnings: Vec::new(),
    };

    if owner.is_null() {
        outcome.warnings.push(format!(
            "{} creates an organization without an owner membership: the record has no owner_id",
            input.constraint.name
        ));
        return outcome;
    }

    let mut membership = Record::new();
    membership.insert(
        "organization_id".to_string(),
        Value::String(placeholder("organizations", "id")),
    );
    membership.insert("user_id".to_string(), owner);
    membership.insert("role".to_string(), Value::String("owner".to_string()));
    outcome.operations.push(
        DependencyOperation::new(
            OperationKind::Create,
            "organization_members",
            membership,
            "the new organization needs an owner membership",
            20,
        )
        .depends_on("organizations"),
    );
    outcome
}

fn account_owner_applies(input: &RuleInput<'_>) -> bool {
    input.is_table("accounts") && input.mentions("owner") && input.mentions("member")
}

fn account_owner_requires(_: &RuleInput<'_>) -> Vec<String> {
    vec!["account_members".to_string()]
}

fn account_owner_handler(input: &RuleInput<'_>) -> RuleOutcome {
    owner_membership(input, "account_members", "account_id")
}

fn organization_owner_applies(input: &RuleInput<'_>) -> bool {
    input.is_table("organizations") && input.mentions("owner")
}

fn organization_owner_requires(_: &RuleInput<'_>) -> Vec<String> {
    vec!["organization_members".to_string()]
}

fn organization_owner_handler(input: &RuleInput<'_>) -> RuleOutcome {
    owner_membership(input, "organization_members", "organization_id")
}

fn owner_membership(input: &RuleInput<'_>, members_table: &str, parent_column: &str) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let owner = owner_id(input);
    if owner.is_null() {
        outcome.warnings.push(format!(
            "{} requires an owner membership but the record has no owner_id",
            input.constraint.name
        ));
        return outcome;
    }

    let mut membership = Record::new();
    membership.insert(
        parent_column.to_string(),
        Value::String(placeholder(input.table, "id")),
    );
    membership.insert("user_id".to_string(), owner);
    membership.insert("role".to_string(), Value::String("owner".to_string()));

    outcome.operations.push(DependencyOperation::new(
        OperationKind::Link,
        members_table,
        membership,
        format!("{} must have an owner in {members_table}", base_table(input.table)),
        50,
    ));
    outcome
}

fn principal_profile_applies(input: &RuleInput<'_>) -> bool {
    (input.is_table("users") || input.is_table("principals")) && input.mentions("profile")
}

fn principal_profile_requires(_: &RuleInput<'_>) -> Vec<String> {
    vec!["profiles".to_string()]
}

fn principal_profile_handler(input: &RuleInput<'_>) -> RuleOutcome {
    let mut profile = Record::new();
    profile.insert(
        "id".to_string(),
        Value::String(placeholder(input.table, "id")),
    );
    for field in ["email", "full_name", "display_name"] {
        if let Some(value) = input.field(field) {
            profile.insert(field.to_string(), value.clone());
        }
    }

    RuleOutcome {
        operations: vec![DependencyOperation::new(
            OperationKind::Link,
            "profiles",
            profile,
            "every auth principal has a profile record",
            50,
        )],
        ..RuleOutcome::default()
    }
}

const SUBSCRIPTION_TYPE_FIELDS: [&str; 3] = ["subscription_type", "plan_type", "type"];

fn subscription_type<'a>(input: &RuleInput<'a>) -> Option<(&'static str, &'a str)> {
    SUBSCRIPTION_TYPE_FIELDS
        .iter()
        .find_map(|field| input.text(field).map(|value| (*field, value)))
}

fn subscription_applies(input: &RuleInput<'_>) -> bool {
    input.is_table("subscriptions")
        && (input.mentions("account_type") || (input.mentions("account") && input.mentions("type")))
}

fn subscription_requires(_: &RuleInput<'_>) -> Vec<String> {
    vec!["accounts".to_string()]
}

fn subscription_handler(input: &RuleInput<'_>) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let current = subscription_type(input);

    if let (Some(account_type), Some((field, kind))) = (input.text("account_type"), current) {
        if !account_type.eq_ignore_ascii_case(kind) {
            outcome.modifications.push(input.modification(
                field,
                Value::String(account_type.to_string()),
                format!("subscription type must match account type {account_type}"),
                0.7,
            ));
        }
    }

    if input.field("account_id").is_none() {
        let mut account = Record::new();
        if let Some(kind) = input
            .text("account_type")
            .or_else(|| current.map(|(_, kind)| kind))
        {
            account.insert("account_type".to_string(), Value::String(kind.to_string()));
        }
        outcome.operations.push(DependencyOperation::new(
            OperationKind::Create,
            "accounts",
            account,
            "subscriptions belong to an account of the same type",
            10,
        ));
        outcome.modifications.push(input.modification(
            "account_id",
            Value::String(placeholder("accounts", "id")),
            "reference the account created for this subscription",
            0.8,
        ));
    }

    outcome
}

fn invitation_applies(input: &RuleInput<'_>) -> bool {
    input.is_table("invitations")
        && (input.mentions("expire") || input.mentions("expiry") || input.mentions("role"))
}

fn invitation_handler(input: &RuleInput<'_>) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let options = input.options;

    if input.field("expires_at").is_none() {
        let expires_at = input.now + Duration::days(options.invitation_expiry_days);
        outcome.modifications.push(input.modification(
            "expires_at",
            Value::String(expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            format!(
                "invitations expire {} days after creation by default",
                options.invitation_expiry_days
            ),
            0.9,
        ));
    }

    let role_is_valid = input
        .text("role")
        .is_some_and(|role| options.valid_roles.iter().any(|valid| valid == role));
    if !role_is_valid {
        outcome.modifications.push(input.modification(
            "role",
            Value::String(options.default_role.clone()),
            format!("invitation role must be one of {}", options.valid_roles.join(", ")),
            0.8,
        ));
    }

    outcome
}
