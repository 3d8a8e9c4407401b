//! Production (rule) representation.
//!
//! A production is a named, ordered list of left-hand-side conditions over
//! symbols and variables, plus an ordered list of right-hand-side preference
//! actions. Productions of every kind (user-written, default, learned
//! chunks, justifications) live in one homogeneous collection tagged
//! by [`ProductionKind`].

use std::collections::HashSet;
use std::fmt;

use crate::error::ProductionError;
use crate::symbol::Symbol;

/// Where a production came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductionKind {
    /// Loaded from user rule text.
    User,
    /// Shipped default knowledge.
    Default,
    /// Learned by chunking, generalized.
    Chunk,
    /// Learned by chunking, not generalizable; valid only for the exact
    /// identifiers it was built from.
    Justification,
}

impl fmt::Display for ProductionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Default => write!(f, "default"),
            Self::Chunk => write!(f, "chunk"),
            Self::Justification => write!(f, "justification"),
        }
    }
}

/// Relational operators usable in condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// `<` numeric less-than.
    Less,
    /// `>` numeric greater-than.
    Greater,
    /// `<=` numeric at-most.
    LessEq,
    /// `>=` numeric at-least.
    GreaterEq,
    /// `<>` not-equal (any type).
    NotEq,
    /// `<=>` same-type.
    SameType,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Less => write!(f, "<"),
            Self::Greater => write!(f, ">"),
            Self::LessEq => write!(f, "<="),
            Self::GreaterEq => write!(f, ">="),
            Self::NotEq => write!(f, "<>"),
            Self::SameType => write!(f, "<=>"),
        }
    }
}

/// The referent of a relational test.
#[derive(Debug, Clone, PartialEq)]
pub enum TestArg {
    /// Compare against a literal constant.
    Constant(Symbol),
    /// Compare against an earlier variable binding.
    Variable(String),
}

impl fmt::Display for TestArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(s) => write!(f, "{s}"),
            Self::Variable(v) => write!(f, "<{v}>"),
        }
    }
}

/// A test applied to one WME field.
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    /// Matches anything.
    Any,
    /// Must equal the interned constant.
    Constant(Symbol),
    /// Binds or must equal the named variable.
    Variable(String),
    /// Must equal one of the listed constants (`<< a b c >>`).
    Disjunction(Vec<Symbol>),
    /// Relational comparison against a constant or bound variable.
    Relational {
        /// The operator.
        relation: Relation,
        /// What to compare against.
        referent: TestArg,
    },
    /// All sub-tests must hold (`{ <x> > 2 }`).
    Conjunctive(Vec<Test>),
}

impl Test {
    /// The equality constant, if this test pins the field to one symbol.
    #[must_use]
    pub fn constant(&self) -> Option<&Symbol> {
        match self {
            Self::Constant(s) => Some(s),
            Self::Conjunctive(tests) => tests.iter().find_map(Test::constant),
            _ => None,
        }
    }

    /// The bound variable name, if any part of this test binds one.
    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Variable(v) => Some(v),
            Self::Conjunctive(tests) => tests.iter().find_map(Test::variable),
            _ => None,
        }
    }

    fn collect_referenced(&self, out: &mut Vec<String>) {
        match self {
            Self::Variable(v) => out.push(v.clone()),
            Self::Relational {
                referent: TestArg::Variable(v),
                ..
            } => out.push(v.clone()),
            Self::Conjunctive(tests) => {
                for t in tests {
                    t.collect_referenced(out);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Constant(s) => write!(f, "{s}"),
            Self::Variable(v) => write!(f, "<{v}>"),
            Self::Disjunction(alts) => {
                write!(f, "<<")?;
                for a in alts {
                    write!(f, " {a}")?;
                }
                write!(f, " >>")
            }
            Self::Relational { relation, referent } => write!(f, "{relation} {referent}"),
            Self::Conjunctive(tests) => {
                write!(f, "{{")?;
                for (i, t) in tests.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One single-WME pattern: tests for the three fields plus the
/// acceptable-preference flag.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternCondition {
    /// Test on the identifier field.
    pub id: Test,
    /// Test on the attribute field.
    pub attr: Test,
    /// Test on the value field.
    pub value: Test,
    /// Matches only acceptable-preference WMEs when true.
    pub acceptable: bool,
    /// Restricts the identifier to a current goal (`state`/`impasse`
    /// keyword in rule text).
    pub goal_test: bool,
}

/// A left-hand-side condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A WME matching the pattern must exist.
    Positive(PatternCondition),
    /// No WME matching the pattern may exist.
    Negative(PatternCondition),
    /// No combination of WMEs satisfying all inner conditions may exist
    /// (`-{ … }`).
    NegatedConjunction(Vec<Condition>),
}

impl Condition {
    /// Returns the pattern for simple (non-NCC) conditions.
    #[must_use]
    pub fn pattern(&self) -> Option<&PatternCondition> {
        match self {
            Self::Positive(p) | Self::Negative(p) => Some(p),
            Self::NegatedConjunction(_) => None,
        }
    }

    /// Returns true for positive conditions.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        matches!(self, Self::Positive(_))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive(p) => write_pattern(f, p, false),
            Self::Negative(p) => write_pattern(f, p, true),
            Self::NegatedConjunction(conds) => {
                write!(f, "-{{")?;
                for c in conds {
                    write!(f, " {c}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

fn write_pattern(f: &mut fmt::Formatter<'_>, p: &PatternCondition, negated: bool) -> fmt::Result {
    if negated {
        write!(f, "-")?;
    }
    write!(f, "(")?;
    if p.goal_test {
        write!(f, "state ")?;
    }
    write!(f, "{} ^{} {}", p.id, p.attr, p.value)?;
    if p.acceptable {
        write!(f, " +")?;
    }
    write!(f, ")")
}

/// The preference kind an action asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceSpec {
    /// `+` candidate for the slot.
    Acceptable,
    /// `-` never install this value.
    Reject,
    /// `!` the value must be selected.
    Require,
    /// `~` the value must not be selected.
    Prohibit,
    /// `@` reconsider the current selection.
    Reconsider,
    /// `> referent` strictly preferred to the referent.
    Better,
    /// `< referent` strictly worse than the referent.
    Worse,
    /// `>` as good as anything can be.
    Best,
    /// `<` as bad as anything can be.
    Worst,
    /// `=` indifferent to every other indifferent candidate.
    UnaryIndifferent,
    /// `= referent` mutually indifferent with the referent.
    BinaryIndifferent,
}

impl PreferenceSpec {
    /// Returns true for kinds that carry a referent value.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Better | Self::Worse | Self::BinaryIndifferent)
    }
}

impl fmt::Display for PreferenceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptable => write!(f, "+"),
            Self::Reject => write!(f, "-"),
            Self::Require => write!(f, "!"),
            Self::Prohibit => write!(f, "~"),
            Self::Reconsider => write!(f, "@"),
            Self::Better | Self::Best => write!(f, ">"),
            Self::Worse | Self::Worst => write!(f, "<"),
            Self::UnaryIndifferent | Self::BinaryIndifferent => write!(f, "="),
        }
    }
}

/// A value-producing RHS function call.
#[derive(Debug, Clone, PartialEq)]
pub enum RhsFunction {
    /// `(gensym prefix)`: a fresh, never-used string constant.
    Gensym {
        /// Prefix of the generated name.
        prefix: String,
    },
    /// `(rand-int bound)`: a uniform integer in `[0, bound)` from the
    /// agent's seeded generator.
    RandInt {
        /// Exclusive upper bound.
        bound: i64,
    },
}

impl fmt::Display for RhsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gensym { prefix } => write!(f, "(gensym {prefix})"),
            Self::RandInt { bound } => write!(f, "(rand-int {bound})"),
        }
    }
}

/// A value position on the RHS.
#[derive(Debug, Clone, PartialEq)]
pub enum RhsValue {
    /// A literal constant.
    Constant(Symbol),
    /// A variable, bound on the LHS or minted as a fresh identifier on
    /// first unbound use.
    Variable(String),
    /// A function call evaluated at firing time.
    Function(RhsFunction),
}

impl RhsValue {
    /// The variable name, if this is a variable reference.
    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Variable(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for RhsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(s) => write!(f, "{s}"),
            Self::Variable(v) => write!(f, "<{v}>"),
            Self::Function(func) => write!(f, "{func}"),
        }
    }
}

/// One RHS action: assert a preference for `(id ^attr value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Target identifier.
    pub id: RhsValue,
    /// Target attribute.
    pub attr: RhsValue,
    /// Target value.
    pub value: RhsValue,
    /// The preference kind.
    pub preference: PreferenceSpec,
    /// Referent for binary kinds.
    pub referent: Option<RhsValue>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} ^{} {} {}",
            self.id, self.attr, self.value, self.preference
        )?;
        if let Some(r) = &self.referent {
            write!(f, " {r}")?;
        }
        write!(f, ")")
    }
}

/// A named production.
#[derive(Debug, Clone)]
pub struct Production {
    /// Unique name.
    pub name: String,
    /// Provenance tag.
    pub kind: ProductionKind,
    /// Optional documentation string.
    pub documentation: Option<String>,
    /// Ordered LHS conditions.
    pub conditions: Vec<Condition>,
    /// Ordered RHS actions.
    pub actions: Vec<Action>,
}

impl Production {
    /// Creates a user production. Call [`Production::validate`] before
    /// installing it.
    #[must_use]
    pub fn new(name: impl Into<String>, conditions: Vec<Condition>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            kind: ProductionKind::User,
            documentation: None,
            conditions,
            actions,
        }
    }

    /// Sets the provenance tag.
    #[must_use]
    pub const fn with_kind(mut self, kind: ProductionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Variables bound by positive conditions, in binding order.
    #[must_use]
    pub fn bound_variables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        collect_bound(&self.conditions, &mut seen, &mut out);
        out
    }

    /// Checks the structural invariants the match network relies on.
    pub fn validate(&self) -> Result<(), ProductionError> {
        if self.conditions.is_empty() {
            return Err(ProductionError::NoConditions {
                name: self.name.clone(),
            });
        }
        if self.actions.is_empty() {
            return Err(ProductionError::NoActions {
                name: self.name.clone(),
            });
        }
        if !self.conditions[0].is_positive() {
            return Err(ProductionError::NegativeFirstCondition {
                name: self.name.clone(),
            });
        }

        // Negated conditions may only consume bindings, never introduce
        // ones used elsewhere.
        let mut bound: HashSet<String> = HashSet::new();
        for cond in &self.conditions {
            match cond {
                Condition::Positive(p) => {
                    for test in [&p.id, &p.attr, &p.value] {
                        let mut refs = Vec::new();
                        test.collect_referenced(&mut refs);
                        for v in refs {
                            bound.insert(v);
                        }
                    }
                }
                Condition::Negative(p) => {
                    self.check_negated_id_bound(&p.id, &bound)?;
                }
                Condition::NegatedConjunction(inner) => {
                    let mut local = bound.clone();
                    for c in inner {
                        match c {
                            Condition::Positive(p) => {
                                self.check_negated_id_bound(&p.id, &local)?;
                                for test in [&p.id, &p.attr, &p.value] {
                                    let mut refs = Vec::new();
                                    test.collect_referenced(&mut refs);
                                    for v in refs {
                                        local.insert(v);
                                    }
                                }
                            }
                            Condition::Negative(p) => {
                                self.check_negated_id_bound(&p.id, &local)?;
                            }
                            Condition::NegatedConjunction(_) => {}
                        }
                    }
                }
            }
        }

        // Action identifiers must be LHS-bound or introduced by an earlier
        // action's fresh value variable; referent arity must match the
        // preference kind.
        let mut action_bound = bound;
        for action in &self.actions {
            if let Some(v) = action.id.variable() {
                if !action_bound.contains(v) {
                    return Err(ProductionError::UnboundActionIdentifier {
                        name: self.name.clone(),
                        variable: v.to_string(),
                    });
                }
            }
            if action.preference.is_binary() && action.referent.is_none() {
                return Err(ProductionError::MissingReferent {
                    name: self.name.clone(),
                    preference: format!("{:?}", action.preference),
                });
            }
            if !action.preference.is_binary() && action.referent.is_some() {
                return Err(ProductionError::UnexpectedReferent {
                    name: self.name.clone(),
                    preference: format!("{:?}", action.preference),
                });
            }
            if let Some(v) = action.value.variable() {
                // First unbound use mints a fresh identifier at firing
                // time and binds the variable for later actions.
                action_bound.insert(v.to_string());
            }
        }

        Ok(())
    }

    fn check_negated_id_bound(
        &self,
        id_test: &Test,
        bound: &HashSet<String>,
    ) -> Result<(), ProductionError> {
        let mut refs = Vec::new();
        id_test.collect_referenced(&mut refs);
        for v in refs {
            if !bound.contains(&v) {
                return Err(ProductionError::UnboundNegatedVariable {
                    name: self.name.clone(),
                    variable: v,
                });
            }
        }
        Ok(())
    }

    /// Canonical body text with variables renamed in order of first
    /// appearance. Two productions with the same canonical text match and
    /// act identically.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        let mut renames: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for v in self.bound_variables() {
            seen.insert(v.clone());
            let fresh = format!("v{}", renames.len() + 1);
            renames.push((v, fresh));
        }
        for action in &self.actions {
            for value in [Some(&action.id), Some(&action.attr), Some(&action.value), action.referent.as_ref()]
                .into_iter()
                .flatten()
            {
                if let Some(v) = value.variable() {
                    if seen.insert(v.to_string()) {
                        let fresh = format!("v{}", renames.len() + 1);
                        renames.push((v.to_string(), fresh));
                    }
                }
            }
        }
        let mut text = String::new();
        for cond in &self.conditions {
            text.push_str(&format!("{cond}\n"));
        }
        text.push_str("-->\n");
        for action in &self.actions {
            text.push_str(&format!("{action}\n"));
        }
        // Longest names first so <op2> is not clobbered by a rename of <op>.
        let mut ordered = renames;
        ordered.sort_by_key(|(from, _)| std::cmp::Reverse(from.len()));
        for (from, to) in ordered {
            text = text.replace(&format!("<{from}>"), &format!("<{to}>"));
        }
        text
    }

    /// Stable fingerprint of the canonical body, used to detect duplicate
    /// chunks and reloads of an identical rule.
    #[must_use]
    pub fn fingerprint(&self) -> blake3::Hash {
        blake3::hash(self.canonical_text().as_bytes())
    }
}

impl PartialEq for Production {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Production {}

impl std::hash::Hash for Production {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sp {{{}", self.name)?;
        for cond in &self.conditions {
            writeln!(f, "    {cond}")?;
        }
        writeln!(f, "    -->")?;
        for action in &self.actions {
            writeln!(f, "    {action}")?;
        }
        write!(f, "}}")
    }
}

fn collect_bound(conditions: &[Condition], seen: &mut HashSet<String>, out: &mut Vec<String>) {
    for cond in conditions {
        if let Condition::Positive(p) = cond {
            for test in [&p.id, &p.attr, &p.value] {
                let mut refs = Vec::new();
                test.collect_referenced(&mut refs);
                for v in refs {
                    if seen.insert(v.clone()) {
                        out.push(v);
                    }
                }
            }
        }
    }
}
