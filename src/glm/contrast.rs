//! Contrast matrices built from symbolic expressions over design columns
//!
//! An expression is a linear combination of group column names:
//! `Basal - LP`, `(Basal + LP)/2 - ML`, `0.5*LP - 0.5*ML`. Names that are not
//! plain identifiers can be written in backticks. A contrast may be named
//! with `name = expression`; otherwise its name is the expression with
//! whitespace removed.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1};

use super::design::DesignMatrix;
use crate::error::{Result, VoomError};

/// Contrasts over design coefficients (coefficients x contrasts)
#[derive(Debug, Clone)]
pub struct ContrastMatrix {
    matrix: Array2<f64>,
    coef_names: Vec<String>,
    contrast_names: Vec<String>,
}

impl ContrastMatrix {
    /// Parse one contrast per expression against the design's columns
    pub fn from_expressions<S: AsRef<str>>(design: &DesignMatrix, expressions: &[S]) -> Result<Self> {
        if expressions.is_empty() {
            return Err(VoomError::InvalidContrast {
                contrast: String::new(),
                reason: "at least one contrast is required".to_string(),
            });
        }

        let n_coefs = design.n_coefs();
        let mut matrix = Array2::zeros((n_coefs, expressions.len()));
        let mut names = Vec::with_capacity(expressions.len());

        for (k, raw) in expressions.iter().enumerate() {
            let raw = raw.as_ref();
            let (name, expr) = split_name(raw);
            let form = parse_linear(expr).map_err(|reason| VoomError::InvalidContrast {
                contrast: raw.to_string(),
                reason,
            })?;

            if form.constant.abs() > 1e-12 {
                return Err(VoomError::InvalidContrast {
                    contrast: raw.to_string(),
                    reason: format!("contains a constant term {}", form.constant),
                });
            }

            for (coef, &weight) in &form.coefs {
                let idx = design.column_index(coef).ok_or_else(|| VoomError::InvalidContrast {
                    contrast: raw.to_string(),
                    reason: format!(
                        "'{}' is not a design column (available: {})",
                        coef,
                        design.column_names().join(", ")
                    ),
                })?;
                if !design.is_group_column(idx) && weight != 0.0 {
                    return Err(VoomError::InvalidContrast {
                        contrast: raw.to_string(),
                        reason: format!("'{}' is a covariate column; only group columns may be contrasted", coef),
                    });
                }
                matrix[[idx, k]] = weight;
            }

            if matrix.column(k).iter().all(|&w| w == 0.0) {
                return Err(VoomError::InvalidContrast {
                    contrast: raw.to_string(),
                    reason: "all contrast weights are zero".to_string(),
                });
            }

            if names.contains(&name) {
                return Err(VoomError::InvalidContrast {
                    contrast: raw.to_string(),
                    reason: format!("duplicate contrast name '{}'", name),
                });
            }
            names.push(name);
        }

        Ok(Self {
            matrix,
            coef_names: design.column_names().to_vec(),
            contrast_names: names,
        })
    }

    /// All pairwise differences between group levels, in level order
    pub fn pairwise(design: &DesignMatrix) -> Result<Self> {
        let groups = design.group_columns();
        let mut expressions = Vec::new();
        for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                expressions.push(format!("{}-{}", quote_name(&groups[i]), quote_name(&groups[j])));
            }
        }
        Self::from_expressions(design, &expressions)
    }

    /// Coefficients x contrasts
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn contrast_names(&self) -> &[String] {
        &self.contrast_names
    }

    pub fn n_contrasts(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn contrast_index(&self, name: &str) -> Option<usize> {
        self.contrast_names.iter().position(|n| n == name)
    }

    /// Weights of a named contrast
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.contrast_index(name).map(|k| self.matrix.column(k))
    }
}

fn quote_name(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn split_name(raw: &str) -> (String, &str) {
    match raw.split_once('=') {
        Some((name, expr)) if !name.trim().is_empty() => (name.trim().to_string(), expr),
        _ => (raw.chars().filter(|c| !c.is_whitespace()).collect(), raw),
    }
}

/// A linear form `constant + sum(coef * name)`
#[derive(Debug, Clone, Default, PartialEq)]
struct LinearForm {
    constant: f64,
    coefs: BTreeMap<String, f64>,
}

impl LinearForm {
    fn constant(c: f64) -> Self {
        Self {
            constant: c,
            coefs: BTreeMap::new(),
        }
    }

    fn variable(name: String) -> Self {
        let mut coefs = BTreeMap::new();
        coefs.insert(name, 1.0);
        Self { constant: 0.0, coefs }
    }

    fn is_constant(&self) -> bool {
        self.coefs.values().all(|&c| c == 0.0)
    }

    fn add(mut self, other: LinearForm, sign: f64) -> Self {
        self.constant += sign * other.constant;
        for (name, c) in other.coefs {
            *self.coefs.entry(name).or_insert(0.0) += sign * c;
        }
        self
    }

    fn scale(mut self, factor: f64) -> Self {
        self.constant *= factor;
        for c in self.coefs.values_mut() {
            *c *= factor;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .map(|p| start + p)
                    .ok_or_else(|| "unterminated backtick name".to_string())?;
                tokens.push(Token::Name(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent part, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

/// Recursive descent over `expr := term (('+'|'-') term)*`,
/// `term := unary (('*'|'/') unary)*`, `unary := '-' unary | atom`.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> std::result::Result<LinearForm, String> {
        let mut acc = self.term()?;
        while let Some(tok) = self.peek() {
            let sign = match tok {
                Token::Plus => 1.0,
                Token::Minus => -1.0,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            acc = acc.add(rhs, sign);
        }
        Ok(acc)
    }

    fn term(&mut self) -> std::result::Result<LinearForm, String> {
        let mut acc = self.unary()?;
        while let Some(tok) = self.peek() {
            match tok {
                Token::Star => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    acc = if acc.is_constant() {
                        rhs.scale(acc.constant)
                    } else if rhs.is_constant() {
                        acc.scale(rhs.constant)
                    } else {
                        return Err("product of two coefficients is not linear".to_string());
                    };
                }
                Token::Slash => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if !rhs.is_constant() {
                        return Err("division by a coefficient is not linear".to_string());
                    }
                    if rhs.constant == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    acc = acc.scale(1.0 / rhs.constant);
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn unary(&mut self) -> std::result::Result<LinearForm, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(self.unary()?.scale(-1.0))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> std::result::Result<LinearForm, String> {
        match self.next() {
            Some(Token::Number(v)) => Ok(LinearForm::constant(v)),
            Some(Token::Name(name)) => Ok(LinearForm::variable(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(tok) => Err(format!("unexpected token {:?}", tok)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn parse_linear(input: &str) -> std::result::Result<LinearForm, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let form = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing input at token {}", parser.pos + 1));
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleDesign;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn design() -> DesignMatrix {
        let mut sd = SampleDesign::new(
            strings(&["s1", "s2", "s3", "s4", "s5", "s6", "s7"]),
            "group",
            strings(&["Basal", "Basal", "LP", "LP", "ML", "ML", "ML"]),
        )
        .unwrap();
        sd.add_covariate("lane", strings(&["a", "b", "a", "b", "a", "b", "a"])).unwrap();
        DesignMatrix::from_sample_design(&sd).unwrap()
    }

    #[test]
    fn test_simple_difference() {
        let d = design();
        let c = ContrastMatrix::from_expressions(&d, &["Basal - LP"]).unwrap();
        assert_eq!(c.contrast_names(), &strings(&["Basal-LP"])[..]);
        assert_eq!(c.column("Basal-LP").unwrap().to_vec(), vec![1.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_named_average_contrast() {
        let d = design();
        let c = ContrastMatrix::from_expressions(&d, &["avg = (Basal + LP)/2 - ML", "2*LP - 2*ML"]).unwrap();
        assert_eq!(c.contrast_names()[0], "avg");
        assert_eq!(c.column("avg").unwrap().to_vec(), vec![0.5, 0.5, -1.0, 0.0]);
        assert_eq!(c.matrix().column(1).to_vec(), vec![0.0, 2.0, -2.0, 0.0]);
    }

    #[test]
    fn test_unknown_column_rejected() {
        let d = design();
        let err = ContrastMatrix::from_expressions(&d, &["Basal - Stromal"]).unwrap_err();
        assert!(matches!(err, VoomError::InvalidContrast { .. }));
        assert!(err.to_string().contains("Stromal"));
    }

    #[test]
    fn test_covariate_column_rejected() {
        let d = design();
        assert!(ContrastMatrix::from_expressions(&d, &["Basal - laneb"]).is_err());
    }

    #[test]
    fn test_nonlinear_and_constant_rejected() {
        let d = design();
        assert!(ContrastMatrix::from_expressions(&d, &["Basal * LP"]).is_err());
        assert!(ContrastMatrix::from_expressions(&d, &["Basal - LP + 1"]).is_err());
        assert!(ContrastMatrix::from_expressions(&d, &["Basal - Basal"]).is_err());
        assert!(ContrastMatrix::from_expressions(&d, &["(Basal - LP"]).is_err());
    }

    #[test]
    fn test_pairwise() {
        let d = design();
        let c = ContrastMatrix::pairwise(&d).unwrap();
        assert_eq!(c.contrast_names(), &strings(&["Basal-LP", "Basal-ML", "LP-ML"])[..]);
        assert_eq!(c.column("LP-ML").unwrap().to_vec(), vec![0.0, 1.0, -1.0, 0.0]);
    }

    #[test]
    fn test_backtick_names() {
        let form = parse_linear("`1h` - `0h`").unwrap();
        assert_eq!(form.coefs.get("1h"), Some(&1.0));
        assert_eq!(form.coefs.get("0h"), Some(&-1.0));
    }
}
