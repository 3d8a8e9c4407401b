//! Rule-text parser.
//!
//! Parses the `sp {name (conditions) --> (actions)}` grammar into
//! [`Production`] values. The grammar is a semantic round-trip of the
//! condition/test/action model, not a bit-exact legacy syntax:
//!
//! ```text
//! sp {propose-hello
//!     "optional documentation"
//!     (state <s> ^io <io>)
//!     (<io> ^input-link <in>)
//!    -(<s> ^done true)
//!     -->
//!     (<s> ^operator <o> +)
//!     (<o> ^name hello)
//! }
//! ```
//!
//! Variables are `<x>`, negation is a leading `-`, conjunctive negation is
//! `-{ … }`, disjunctions are `<< a b c >>`, conjunctive tests are
//! `{ <v> > 2 }`, and preference specifiers follow the action value.

use crate::error::ParseError;
use crate::production::{
    Action, Condition, PatternCondition, PreferenceSpec, Production, Relation, RhsFunction,
    RhsValue, Test, TestArg,
};
use crate::symbol::SymbolTable;

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LBrace,
    RBrace,
    LParen,
    RParen,
    Arrow,
    Minus,
    Caret,
    Plus,
    Bang,
    Tilde,
    At,
    Eq,
    LDisj,
    RDisj,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    NotEq,
    SameType,
    Variable(String),
    Word(String),
    Int(i64),
    Float(f64),
    Quoted(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

impl Token {
    fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Variable(v) => format!("<{v}>"),
            TokenKind::Word(w) => w.clone(),
            TokenKind::Int(v) => v.to_string(),
            TokenKind::Float(v) => v.to_string(),
            TokenKind::Quoted(s) => format!("\"{s}\""),
            TokenKind::Arrow => "-->".to_string(),
            TokenKind::LBrace => "{".to_string(),
            TokenKind::RBrace => "}".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Caret => "^".to_string(),
            TokenKind::Plus => "+".to_string(),
            TokenKind::Bang => "!".to_string(),
            TokenKind::Tilde => "~".to_string(),
            TokenKind::At => "@".to_string(),
            TokenKind::Eq => "=".to_string(),
            TokenKind::LDisj => "<<".to_string(),
            TokenKind::RDisj => ">>".to_string(),
            TokenKind::Less => "<".to_string(),
            TokenKind::Greater => ">".to_string(),
            TokenKind::LessEq => "<=".to_string(),
            TokenKind::GreaterEq => ">=".to_string(),
            TokenKind::NotEq => "<>".to_string(),
            TokenKind::SameType => "<=>".to_string(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '*' | '?' | '$' | '.' | ':' | '/')
}

fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let bytes: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let offset = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '#' | ';' => {
                // Comment to end of line.
                while i < bytes.len() && bytes[i] != '\n' {
                    i += 1;
                }
            }
            '{' => {
                tokens.push(Token { kind: TokenKind::LBrace, offset });
                i += 1;
            }
            '}' => {
                tokens.push(Token { kind: TokenKind::RBrace, offset });
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset });
                i += 1;
            }
            '^' => {
                tokens.push(Token { kind: TokenKind::Caret, offset });
                i += 1;
            }
            '+' => {
                tokens.push(Token { kind: TokenKind::Plus, offset });
                i += 1;
            }
            '!' => {
                tokens.push(Token { kind: TokenKind::Bang, offset });
                i += 1;
            }
            '~' => {
                tokens.push(Token { kind: TokenKind::Tilde, offset });
                i += 1;
            }
            '@' => {
                tokens.push(Token { kind: TokenKind::At, offset });
                i += 1;
            }
            '=' => {
                tokens.push(Token { kind: TokenKind::Eq, offset });
                i += 1;
            }
            '-' => {
                if bytes.get(i + 1) == Some(&'-') && bytes.get(i + 2) == Some(&'>') {
                    tokens.push(Token { kind: TokenKind::Arrow, offset });
                    i += 3;
                } else if bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit() || *c == '.') {
                    let (kind, next) = read_number(&bytes, i)?;
                    tokens.push(Token { kind, offset });
                    i = next;
                } else {
                    tokens.push(Token { kind: TokenKind::Minus, offset });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&'<') {
                    tokens.push(Token { kind: TokenKind::LDisj, offset });
                    i += 2;
                } else if bytes.get(i + 1) == Some(&'=') {
                    if bytes.get(i + 2) == Some(&'>') {
                        tokens.push(Token { kind: TokenKind::SameType, offset });
                        i += 3;
                    } else {
                        tokens.push(Token { kind: TokenKind::LessEq, offset });
                        i += 2;
                    }
                } else if bytes.get(i + 1) == Some(&'>') {
                    tokens.push(Token { kind: TokenKind::NotEq, offset });
                    i += 2;
                } else if bytes.get(i + 1).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                    // A variable: <name>
                    let mut j = i + 1;
                    while j < bytes.len() && (bytes[j].is_alphanumeric() || matches!(bytes[j], '_' | '-' | '*')) {
                        j += 1;
                    }
                    if bytes.get(j) == Some(&'>') {
                        let name: String = bytes[i + 1..j].iter().collect();
                        tokens.push(Token { kind: TokenKind::Variable(name), offset });
                        i = j + 1;
                    } else {
                        tokens.push(Token { kind: TokenKind::Less, offset });
                        i += 1;
                    }
                } else {
                    tokens.push(Token { kind: TokenKind::Less, offset });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&'>') {
                    tokens.push(Token { kind: TokenKind::RDisj, offset });
                    i += 2;
                } else if bytes.get(i + 1) == Some(&'=') {
                    tokens.push(Token { kind: TokenKind::GreaterEq, offset });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Greater, offset });
                    i += 1;
                }
            }
            '"' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != '"' {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ParseError::UnterminatedString { offset });
                }
                let s: String = bytes[i + 1..j].iter().collect();
                tokens.push(Token { kind: TokenKind::Quoted(s), offset });
                i = j + 1;
            }
            '|' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != '|' {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ParseError::UnterminatedString { offset });
                }
                let s: String = bytes[i + 1..j].iter().collect();
                tokens.push(Token { kind: TokenKind::Word(s), offset });
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let (kind, next) = read_number(&bytes, i)?;
                tokens.push(Token { kind, offset });
                i = next;
            }
            c if is_word_char(c) => {
                let mut j = i;
                while j < bytes.len() && is_word_char(bytes[j]) {
                    j += 1;
                }
                let word: String = bytes[i..j].iter().collect();
                tokens.push(Token { kind: TokenKind::Word(word), offset });
                i = j;
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    found: other.to_string(),
                    offset,
                    expected: "a token",
                });
            }
        }
    }

    Ok(tokens)
}

fn read_number(bytes: &[char], start: usize) -> Result<(TokenKind, usize), ParseError> {
    let mut j = start;
    if bytes[j] == '-' {
        j += 1;
    }
    let mut saw_dot = false;
    while j < bytes.len() && (bytes[j].is_ascii_digit() || (bytes[j] == '.' && !saw_dot)) {
        if bytes[j] == '.' {
            saw_dot = true;
        }
        j += 1;
    }
    let literal: String = bytes[start..j].iter().collect();
    let kind = if saw_dot {
        TokenKind::Float(literal.parse().map_err(|_| ParseError::InvalidNumber {
            literal: literal.clone(),
            offset: start,
        })?)
    } else {
        TokenKind::Int(literal.parse().map_err(|_| ParseError::InvalidNumber {
            literal: literal.clone(),
            offset: start,
        })?)
    };
    Ok((kind, j))
}

/// Outcome of parsing a block of rule text.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Successfully parsed productions, in source order.
    pub productions: Vec<Production>,
    /// Errors for productions that failed; each aborted only its own
    /// `sp` block.
    pub errors: Vec<ParseError>,
}

/// Parses every `sp {…}` block in the text.
///
/// A malformed production aborts at its closing brace and parsing
/// continues with the next block.
pub fn parse_productions(text: &str, symbols: &mut SymbolTable) -> Result<ParseOutcome, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        symbols,
    };

    let mut outcome = ParseOutcome {
        productions: Vec::new(),
        errors: Vec::new(),
    };

    while !parser.at_end() {
        match parser.parse_production() {
            Ok(p) => outcome.productions.push(p),
            Err(e) => {
                outcome.errors.push(e);
                parser.skip_to_block_end();
            }
        }
    }

    Ok(outcome)
}

/// Parses exactly one production.
pub fn parse_production(text: &str, symbols: &mut SymbolTable) -> Result<Production, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        symbols,
    };
    parser.parse_production()
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    symbols: &'a mut SymbolTable,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self, context: &'static str) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd { context })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, kind: &TokenKind, expected: &'static str) -> Result<(), ParseError> {
        let token = self.next(expected)?;
        if &token.kind == kind {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset: token.offset,
                expected,
            })
        }
    }

    /// After an error, skip past the closing brace of the current block.
    fn skip_to_block_end(&mut self) {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    self.pos += 1;
                    if depth <= 1 {
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn parse_production(&mut self) -> Result<Production, ParseError> {
        let head = self.next("'sp'")?;
        match &head.kind {
            TokenKind::Word(w) if w == "sp" => {}
            _ => {
                return Err(ParseError::NotAProduction {
                    found: head.describe(),
                });
            }
        }
        self.expect(&TokenKind::LBrace, "'{' after sp")?;

        let name_token = self.next("a production name")?;
        let name = match name_token.kind {
            TokenKind::Word(w) => w,
            _ => {
                return Err(ParseError::UnexpectedToken {
                    found: name_token.describe(),
                    offset: name_token.offset,
                    expected: "a production name",
                });
            }
        };

        let documentation = if let Some(TokenKind::Quoted(_)) = self.peek_kind() {
            let Token {
                kind: TokenKind::Quoted(doc),
                ..
            } = self.next("documentation")?
            else {
                unreachable!("peeked a quoted token");
            };
            Some(doc)
        } else {
            None
        };

        let mut conditions = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Arrow) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::RBrace) | None => {
                    return Err(ParseError::MissingArrow { name });
                }
                _ => {
                    let mut parsed = self.parse_condition()?;
                    conditions.append(&mut parsed);
                }
            }
        }

        let mut actions = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.pos += 1;
                    break;
                }
                None => {
                    return Err(ParseError::UnexpectedEnd {
                        context: "an action or '}'",
                    });
                }
                _ => {
                    let mut parsed = self.parse_action(&name)?;
                    actions.append(&mut parsed);
                }
            }
        }

        let mut production = Production::new(name, conditions, actions);
        production.documentation = documentation;
        Ok(production)
    }

    /// One source condition, which may expand to several patterns when it
    /// carries multiple `^attr value` groups.
    fn parse_condition(&mut self) -> Result<Vec<Condition>, ParseError> {
        let negated = if self.peek_kind() == Some(&TokenKind::Minus) {
            self.pos += 1;
            true
        } else {
            false
        };

        if negated && self.peek_kind() == Some(&TokenKind::LBrace) {
            // Conjunctive negation: -{ cond... }
            self.pos += 1;
            let mut inner = Vec::new();
            while self.peek_kind() != Some(&TokenKind::RBrace) {
                if self.at_end() {
                    return Err(ParseError::UnexpectedEnd {
                        context: "a condition inside -{ }",
                    });
                }
                let mut parsed = self.parse_condition()?;
                inner.append(&mut parsed);
            }
            self.pos += 1;
            return Ok(vec![Condition::NegatedConjunction(inner)]);
        }

        self.expect(&TokenKind::LParen, "'(' starting a condition")?;

        let goal_test = matches!(
            self.peek_kind(),
            Some(TokenKind::Word(w)) if w == "state" || w == "impasse"
        );
        if goal_test {
            self.pos += 1;
        }

        let id_test = self.parse_test("an identifier test")?;

        let mut patterns = Vec::new();
        while self.peek_kind() == Some(&TokenKind::Caret) {
            self.pos += 1;
            let attr_test = self.parse_test("an attribute test")?;
            let value_test = self.parse_test("a value test")?;
            let acceptable = if self.peek_kind() == Some(&TokenKind::Plus) {
                self.pos += 1;
                true
            } else {
                false
            };
            patterns.push(PatternCondition {
                id: id_test.clone(),
                attr: attr_test,
                value: value_test,
                acceptable,
                goal_test,
            });
        }
        self.expect(&TokenKind::RParen, "')' closing a condition")?;

        if patterns.is_empty() {
            let token = self.peek().cloned();
            return Err(ParseError::UnexpectedToken {
                found: token.as_ref().map_or_else(|| "end".to_string(), |t| t.describe()),
                offset: token.as_ref().map_or(0, |t| t.offset),
                expected: "'^' starting an attribute test",
            });
        }

        if negated {
            if patterns.len() == 1 {
                Ok(vec![Condition::Negative(patterns.remove(0))])
            } else {
                // A negated multi-attribute condition denies the
                // conjunction of its patterns.
                Ok(vec![Condition::NegatedConjunction(
                    patterns.into_iter().map(Condition::Positive).collect(),
                )])
            }
        } else {
            Ok(patterns.into_iter().map(Condition::Positive).collect())
        }
    }

    fn parse_test(&mut self, context: &'static str) -> Result<Test, ParseError> {
        let token = self.next(context)?;
        match token.kind {
            TokenKind::Variable(v) => Ok(Test::Variable(v)),
            TokenKind::Word(w) => {
                if w == "*" {
                    Ok(Test::Any)
                } else {
                    Ok(Test::Constant(self.symbols.str_constant(w)))
                }
            }
            TokenKind::Int(v) => Ok(Test::Constant(self.symbols.int_constant(v))),
            TokenKind::Float(v) => Ok(Test::Constant(self.symbols.float_constant(v))),
            TokenKind::LDisj => {
                let mut alternatives = Vec::new();
                loop {
                    let alt = self.next("a disjunction alternative")?;
                    match alt.kind {
                        TokenKind::RDisj => break,
                        TokenKind::Word(w) => alternatives.push(self.symbols.str_constant(w)),
                        TokenKind::Int(v) => alternatives.push(self.symbols.int_constant(v)),
                        TokenKind::Float(v) => alternatives.push(self.symbols.float_constant(v)),
                        _ => {
                            return Err(ParseError::UnexpectedToken {
                                found: alt.describe(),
                                offset: alt.offset,
                                expected: "a constant or '>>'",
                            });
                        }
                    }
                }
                Ok(Test::Disjunction(alternatives))
            }
            TokenKind::LBrace => {
                let mut tests = Vec::new();
                while self.peek_kind() != Some(&TokenKind::RBrace) {
                    if self.at_end() {
                        return Err(ParseError::UnexpectedEnd {
                            context: "a test inside { }",
                        });
                    }
                    tests.push(self.parse_test("a conjunctive sub-test")?);
                }
                self.pos += 1;
                Ok(Test::Conjunctive(tests))
            }
            TokenKind::Less => self.parse_relational(Relation::Less),
            TokenKind::Greater => self.parse_relational(Relation::Greater),
            TokenKind::LessEq => self.parse_relational(Relation::LessEq),
            TokenKind::GreaterEq => self.parse_relational(Relation::GreaterEq),
            TokenKind::NotEq => self.parse_relational(Relation::NotEq),
            TokenKind::SameType => self.parse_relational(Relation::SameType),
            _ => Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset: token.offset,
                expected: context,
            }),
        }
    }

    fn parse_relational(&mut self, relation: Relation) -> Result<Test, ParseError> {
        let token = self.next("a relational referent")?;
        let referent = match token.kind {
            TokenKind::Variable(v) => TestArg::Variable(v),
            TokenKind::Word(w) => TestArg::Constant(self.symbols.str_constant(w)),
            TokenKind::Int(v) => TestArg::Constant(self.symbols.int_constant(v)),
            TokenKind::Float(v) => TestArg::Constant(self.symbols.float_constant(v)),
            _ => {
                return Err(ParseError::UnexpectedToken {
                    found: token.describe(),
                    offset: token.offset,
                    expected: "a relational referent",
                });
            }
        };
        Ok(Test::Relational { relation, referent })
    }

    /// One source action, which may expand to several preference actions
    /// when it carries multiple `^attr value` groups.
    fn parse_action(&mut self, production_name: &str) -> Result<Vec<Action>, ParseError> {
        self.expect(&TokenKind::LParen, "'(' starting an action")?;

        let id = self.parse_rhs_value("an action identifier")?;
        let mut actions = Vec::new();

        while self.peek_kind() == Some(&TokenKind::Caret) {
            self.pos += 1;
            let attr = self.parse_rhs_value("an action attribute")?;
            let value = self.parse_rhs_value("an action value")?;
            let (preference, referent) = self.parse_preference(production_name)?;
            actions.push(Action {
                id: id.clone(),
                attr,
                value,
                preference,
                referent,
            });
        }

        self.expect(&TokenKind::RParen, "')' closing an action")?;

        if actions.is_empty() {
            return Err(ParseError::UnexpectedToken {
                found: ")".to_string(),
                offset: 0,
                expected: "'^' starting an action attribute",
            });
        }
        Ok(actions)
    }

    fn parse_preference(
        &mut self,
        production_name: &str,
    ) -> Result<(PreferenceSpec, Option<RhsValue>), ParseError> {
        let spec = match self.peek_kind() {
            Some(TokenKind::Plus) => {
                self.pos += 1;
                (PreferenceSpec::Acceptable, None)
            }
            Some(TokenKind::Minus) => {
                self.pos += 1;
                (PreferenceSpec::Reject, None)
            }
            Some(TokenKind::Bang) => {
                self.pos += 1;
                (PreferenceSpec::Require, None)
            }
            Some(TokenKind::Tilde) => {
                self.pos += 1;
                (PreferenceSpec::Prohibit, None)
            }
            Some(TokenKind::At) => {
                self.pos += 1;
                (PreferenceSpec::Reconsider, None)
            }
            Some(TokenKind::Greater) => {
                self.pos += 1;
                if self.referent_follows() {
                    let referent = self.parse_rhs_value("a better referent")?;
                    (PreferenceSpec::Better, Some(referent))
                } else {
                    (PreferenceSpec::Best, None)
                }
            }
            Some(TokenKind::Less) => {
                self.pos += 1;
                if self.referent_follows() {
                    let referent = self.parse_rhs_value("a worse referent")?;
                    (PreferenceSpec::Worse, Some(referent))
                } else {
                    (PreferenceSpec::Worst, None)
                }
            }
            Some(TokenKind::Eq) => {
                self.pos += 1;
                if self.referent_follows() {
                    let referent = self.parse_rhs_value("an indifferent referent")?;
                    (PreferenceSpec::BinaryIndifferent, Some(referent))
                } else {
                    (PreferenceSpec::UnaryIndifferent, None)
                }
            }
            Some(TokenKind::Caret | TokenKind::RParen) => (PreferenceSpec::Acceptable, None),
            Some(_) => {
                let token = self.peek().cloned().expect("peeked token");
                return Err(ParseError::UnknownPreference {
                    found: token.describe(),
                    name: production_name.to_string(),
                });
            }
            None => {
                return Err(ParseError::UnexpectedEnd {
                    context: "a preference or ')'",
                });
            }
        };
        Ok(spec)
    }

    fn referent_follows(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Variable(_)
                    | TokenKind::Word(_)
                    | TokenKind::Int(_)
                    | TokenKind::Float(_)
            )
        )
    }

    fn parse_rhs_value(&mut self, context: &'static str) -> Result<RhsValue, ParseError> {
        let token = self.next(context)?;
        match token.kind {
            TokenKind::Variable(v) => Ok(RhsValue::Variable(v)),
            TokenKind::Word(w) => Ok(RhsValue::Constant(self.symbols.str_constant(w))),
            TokenKind::Quoted(s) => Ok(RhsValue::Constant(self.symbols.str_constant(s))),
            TokenKind::Int(v) => Ok(RhsValue::Constant(self.symbols.int_constant(v))),
            TokenKind::Float(v) => Ok(RhsValue::Constant(self.symbols.float_constant(v))),
            TokenKind::LParen => {
                let name_token = self.next("an RHS function name")?;
                let TokenKind::Word(name) = name_token.kind else {
                    return Err(ParseError::UnexpectedToken {
                        found: name_token.describe(),
                        offset: name_token.offset,
                        expected: "an RHS function name",
                    });
                };
                let func = match name.as_str() {
                    "gensym" => {
                        let prefix = match self.peek_kind() {
                            Some(TokenKind::Word(_)) => {
                                let Token {
                                    kind: TokenKind::Word(w),
                                    ..
                                } = self.next("a gensym prefix")?
                                else {
                                    unreachable!("peeked a word token");
                                };
                                w
                            }
                            _ => "g".to_string(),
                        };
                        RhsFunction::Gensym { prefix }
                    }
                    "rand-int" => {
                        let bound_token = self.next("a rand-int bound")?;
                        let TokenKind::Int(bound) = bound_token.kind else {
                            return Err(ParseError::UnexpectedToken {
                                found: bound_token.describe(),
                                offset: bound_token.offset,
                                expected: "an integer bound",
                            });
                        };
                        RhsFunction::RandInt { bound }
                    }
                    other => {
                        return Err(ParseError::UnknownRhsFunction {
                            name: other.to_string(),
                        });
                    }
                };
                self.expect(&TokenKind::RParen, "')' closing an RHS function")?;
                Ok(RhsValue::Function(func))
            }
            _ => Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset: token.offset,
                expected: context,
            }),
        }
    }
}
