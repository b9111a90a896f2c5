//! ES module syntax scanner.
//!
//! Finds the top-level `import`/`export` statements and `import()` calls in a
//! token stream. Everything else in the module is left opaque.

use super::lexer::{line_column, string_value, tokenize, LexError, Token, TokenKind};

/// Byte range in the module source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// `imported as local`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub imported: String,
    pub local: String,
}

/// `local as exported`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBinding {
    pub local: String,
    pub exported: String,
}

/// Bindings introduced by an import statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportClause {
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<ImportBinding>,
}

impl ImportClause {
    /// `import "x"` binds nothing.
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.namespace.is_none() && self.named.is_empty()
    }
}

/// The value of an `export default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultExport {
    /// `export default function name() {}` or `export default class Name {}`
    Declaration { name: String },
    /// Anonymous function or class; `terminator` is the offset just past its body.
    Anonymous { terminator: usize },
    /// Any other expression
    Expression,
}

/// A module-syntax construct found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleItem {
    /// Static import, `span` covers the whole statement
    Import { span: Span, specifier: String, clause: ImportClause },
    /// `import("x")` with a literal argument, `span` covers the call
    DynamicImport { span: Span, specifier: String },
    /// `export var|let|const|function|class ...`; `keyword` covers `export `
    ExportDeclaration { keyword: Span, names: Vec<String> },
    /// `export default ...`; `keyword` covers `export default `
    ExportDefault { keyword: Span, value: DefaultExport },
    /// `export { a, b as c } [from "x"]`
    ExportList { span: Span, bindings: Vec<ExportBinding>, from: Option<String> },
    /// `export * [as ns] from "x"`
    ExportAll { span: Span, alias: Option<String>, specifier: String },
    /// `import.meta`
    ImportMeta { span: Span },
}

impl ModuleItem {
    /// The module specifier this item references, if any.
    pub fn specifier(&self) -> Option<&str> {
        match self {
            ModuleItem::Import { specifier, .. }
            | ModuleItem::DynamicImport { specifier, .. }
            | ModuleItem::ExportAll { specifier, .. } => Some(specifier),
            ModuleItem::ExportList { from, .. } => from.as_deref(),
            _ => None,
        }
    }
}

/// Module syntax scan failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{line}:{column}: {message}")]
    Malformed { line: usize, column: usize, message: String },
}

/// Module syntax of one script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSyntax {
    /// Items in source order
    pub items: Vec<ModuleItem>,
    /// Offsets of `import(...)` calls whose argument is not a literal
    pub non_literal_imports: Vec<usize>,
}

impl ModuleSyntax {
    /// Scan a module's source.
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        let tokens = tokenize(source)?;
        Scanner { src: source, tokens: &tokens }.scan()
    }

    /// Referenced specifiers in source order (duplicates kept).
    pub fn specifiers(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(ModuleItem::specifier)
    }
}

type ScanResult<T> = Result<T, SyntaxError>;

struct Scanner<'a> {
    src: &'a str,
    tokens: &'a [Token],
}

fn is_open(text: &str) -> bool {
    matches!(text, "(" | "[" | "{")
}

fn is_close(text: &str) -> bool {
    matches!(text, ")" | "]" | "}")
}

impl<'a> Scanner<'a> {
    fn text(&self, i: usize) -> &'a str {
        self.tokens.get(i).map_or("", |t| t.text(self.src))
    }

    fn kind(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|t| t.kind)
    }

    fn is_punct(&self, i: usize, p: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_punct(self.src, p))
    }

    fn is_ident(&self, i: usize, word: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_ident(self.src, word))
    }

    fn malformed(&self, i: usize, message: &str) -> SyntaxError {
        let offset = self.tokens.get(i).map_or(self.src.len(), |t| t.start);
        let (line, column) = line_column(self.src, offset);
        SyntaxError::Malformed { line, column, message: message.to_string() }
    }

    fn after_member_access(&self, i: usize) -> bool {
        i > 0 && (self.is_punct(i - 1, ".") || self.is_punct(i - 1, "?."))
    }

    fn scan(&self) -> ScanResult<ModuleSyntax> {
        let mut syntax = ModuleSyntax::default();
        let mut depth = 0usize;
        let mut i = 0;

        while i < self.tokens.len() {
            let token = self.tokens[i];
            let text = token.text(self.src);
            match token.kind {
                TokenKind::Punct if is_open(text) => {
                    depth += 1;
                    i += 1;
                }
                TokenKind::Punct if is_close(text) => {
                    depth = depth.saturating_sub(1);
                    i += 1;
                }
                TokenKind::Ident if text == "import" && !self.after_member_access(i) => {
                    if self.is_punct(i + 1, "(") {
                        i = self.dynamic_import(i, &mut syntax)?;
                    } else if self.is_punct(i + 1, ".") && self.is_ident(i + 2, "meta") {
                        let span = Span { start: token.start, end: self.tokens[i + 2].end };
                        syntax.items.push(ModuleItem::ImportMeta { span });
                        i += 3;
                    } else if self.is_punct(i + 1, ".") || depth > 0 {
                        i += 1;
                    } else {
                        let (item, next) = self.import_statement(i)?;
                        syntax.items.push(item);
                        i = next;
                    }
                }
                TokenKind::Ident if text == "export" && depth == 0 && !self.after_member_access(i) => {
                    let (item, next) = self.export_statement(i)?;
                    syntax.items.push(item);
                    i = next;
                }
                _ => i += 1,
            }
        }

        Ok(syntax)
    }

    /// Index of the token closing the bracket opened at `open`.
    fn matching(&self, open: usize) -> ScanResult<usize> {
        let mut depth = 0usize;
        for j in open..self.tokens.len() {
            if self.kind(j) != Some(TokenKind::Punct) {
                continue;
            }
            let text = self.text(j);
            if is_open(text) {
                depth += 1;
            } else if is_close(text) {
                depth -= 1;
                if depth == 0 {
                    return Ok(j);
                }
            }
        }
        Err(self.malformed(open, "unbalanced brackets"))
    }

    /// Literal module specifier at `i`: a string or a template without substitutions.
    fn literal_specifier(&self, i: usize) -> Option<String> {
        let token = self.tokens.get(i)?;
        let text = token.text(self.src);
        match token.kind {
            TokenKind::Str => Some(string_value(text)),
            TokenKind::Template if !text.contains("${") => Some(string_value(text)),
            _ => None,
        }
    }

    fn expect_specifier(&self, i: usize) -> ScanResult<String> {
        match self.kind(i) {
            Some(TokenKind::Str) => Ok(string_value(self.text(i))),
            _ => Err(self.malformed(i, "expected module specifier string")),
        }
    }

    /// An identifier or string naming an import/export binding.
    fn binding_name(&self, i: usize) -> ScanResult<String> {
        match self.kind(i) {
            Some(TokenKind::Ident) => Ok(self.text(i).to_string()),
            Some(TokenKind::Str) => Ok(string_value(self.text(i))),
            _ => Err(self.malformed(i, "expected binding name")),
        }
    }

    /// Skip `with { ... }` / `assert { ... }` import attributes and a trailing `;`.
    fn statement_tail(&self, mut j: usize) -> ScanResult<usize> {
        if (self.is_ident(j, "with") || self.is_ident(j, "assert")) && self.is_punct(j + 1, "{") {
            j = self.matching(j + 1)? + 1;
        }
        if self.is_punct(j, ";") {
            j += 1;
        }
        Ok(j)
    }

    fn span_to(&self, start: usize, next: usize) -> Span {
        Span { start: self.tokens[start].start, end: self.tokens[next - 1].end }
    }

    fn dynamic_import(&self, i: usize, syntax: &mut ModuleSyntax) -> ScanResult<usize> {
        let close = self.matching(i + 1)?;
        match self.literal_specifier(i + 2) {
            Some(specifier) if close == i + 3 || self.is_punct(i + 3, ",") => {
                syntax.items.push(ModuleItem::DynamicImport {
                    span: Span { start: self.tokens[i].start, end: self.tokens[close].end },
                    specifier,
                });
                Ok(close + 1)
            }
            _ => {
                // `import(x) {` is a method named import, not a call
                if !self.is_punct(close + 1, "{") {
                    syntax.non_literal_imports.push(self.tokens[i].start);
                }
                Ok(i + 1)
            }
        }
    }

    fn import_statement(&self, i: usize) -> ScanResult<(ModuleItem, usize)> {
        let mut j = i + 1;
        let mut clause = ImportClause::default();

        if self.kind(j) != Some(TokenKind::Str) {
            if self.kind(j) == Some(TokenKind::Ident) && !self.is_ident(j, "from") {
                clause.default = Some(self.text(j).to_string());
                j += 1;
                if self.is_punct(j, ",") {
                    j += 1;
                }
            }
            if self.is_punct(j, "*") {
                if !self.is_ident(j + 1, "as") || self.kind(j + 2) != Some(TokenKind::Ident) {
                    return Err(self.malformed(j, "expected `* as name`"));
                }
                clause.namespace = Some(self.text(j + 2).to_string());
                j += 3;
            } else if self.is_punct(j, "{") {
                let close = self.matching(j)?;
                j += 1;
                while j < close {
                    let imported = self.binding_name(j)?;
                    let local = if self.is_ident(j + 1, "as") {
                        j += 2;
                        self.text(j).to_string()
                    } else {
                        imported.clone()
                    };
                    clause.named.push(ImportBinding { imported, local });
                    j += 1;
                    if self.is_punct(j, ",") {
                        j += 1;
                    }
                }
                j = close + 1;
            }
            if clause.is_empty() && !self.is_punct(j - 1, "}") {
                return Err(self.malformed(j, "expected import clause"));
            }
            if !self.is_ident(j, "from") {
                return Err(self.malformed(j, "expected `from`"));
            }
            j += 1;
        }

        let specifier = self.expect_specifier(j)?;
        let next = self.statement_tail(j + 1)?;
        Ok((ModuleItem::Import { span: self.span_to(i, next), specifier, clause }, next))
    }

    fn export_statement(&self, i: usize) -> ScanResult<(ModuleItem, usize)> {
        let j = i + 1;
        let keyword = |until: usize| Span {
            start: self.tokens[i].start,
            end: self.tokens.get(until).map_or(self.src.len(), |t| t.start),
        };

        if self.is_punct(j, "*") {
            let mut k = j + 1;
            let mut alias = None;
            if self.is_ident(k, "as") {
                alias = Some(self.binding_name(k + 1)?);
                k += 2;
            }
            if !self.is_ident(k, "from") {
                return Err(self.malformed(k, "expected `from`"));
            }
            let specifier = self.expect_specifier(k + 1)?;
            let next = self.statement_tail(k + 2)?;
            let span = self.span_to(i, next);
            return Ok((ModuleItem::ExportAll { span, alias, specifier }, next));
        }

        if self.is_punct(j, "{") {
            let close = self.matching(j)?;
            let mut bindings = Vec::new();
            let mut k = j + 1;
            while k < close {
                let local = self.binding_name(k)?;
                let exported = if self.is_ident(k + 1, "as") {
                    k += 2;
                    self.binding_name(k)?
                } else {
                    local.clone()
                };
                bindings.push(ExportBinding { local, exported });
                k += 1;
                if self.is_punct(k, ",") {
                    k += 1;
                }
            }
            let mut from = None;
            let mut next = close + 1;
            if self.is_ident(next, "from") {
                from = Some(self.expect_specifier(next + 1)?);
                next += 2;
            }
            let next = self.statement_tail(next)?;
            let span = self.span_to(i, next);
            return Ok((ModuleItem::ExportList { span, bindings, from }, next));
        }

        if self.is_ident(j, "default") {
            let value = self.default_export(j + 1)?;
            return Ok((ModuleItem::ExportDefault { keyword: keyword(j + 1), value }, j + 1));
        }

        let names = match self.text(j) {
            "var" | "let" | "const" => self.declared_names(j + 1)?,
            "function" => vec![self.declaration_name(j + 1)?],
            "class" => vec![self.declaration_name(j + 1)?],
            "async" if self.is_ident(j + 1, "function") => vec![self.declaration_name(j + 2)?],
            _ => return Err(self.malformed(j, "unexpected token after `export`")),
        };
        Ok((ModuleItem::ExportDeclaration { keyword: keyword(j), names }, j + 1))
    }

    /// Name of a function or class declaration; `i` follows the keyword.
    fn declaration_name(&self, mut i: usize) -> ScanResult<String> {
        if self.is_punct(i, "*") {
            i += 1;
        }
        match self.kind(i) {
            Some(TokenKind::Ident) if self.text(i) != "extends" => Ok(self.text(i).to_string()),
            _ => Err(self.malformed(i, "exported declaration needs a name")),
        }
    }

    fn default_export(&self, k: usize) -> ScanResult<DefaultExport> {
        let function = if self.is_ident(k, "function") {
            Some(k)
        } else if self.is_ident(k, "async")
            && self.is_ident(k + 1, "function")
            && !self.tokens[k + 1].newline_before
        {
            Some(k + 1)
        } else {
            None
        };

        if let Some(f) = function {
            let mut n = f + 1;
            if self.is_punct(n, "*") {
                n += 1;
            }
            if self.kind(n) == Some(TokenKind::Ident) {
                return Ok(DefaultExport::Declaration { name: self.text(n).to_string() });
            }
            if !self.is_punct(n, "(") {
                return Err(self.malformed(n, "expected function parameters"));
            }
            let params_end = self.matching(n)?;
            if !self.is_punct(params_end + 1, "{") {
                return Err(self.malformed(params_end + 1, "expected function body"));
            }
            let body_end = self.matching(params_end + 1)?;
            return Ok(DefaultExport::Anonymous { terminator: self.tokens[body_end].end });
        }

        if self.is_ident(k, "class") {
            if self.kind(k + 1) == Some(TokenKind::Ident) && !self.is_ident(k + 1, "extends") {
                return Ok(DefaultExport::Declaration { name: self.text(k + 1).to_string() });
            }
            let mut n = k + 1;
            while n < self.tokens.len() && !self.is_punct(n, "{") {
                n = if self.is_punct(n, "(") || self.is_punct(n, "[") {
                    self.matching(n)? + 1
                } else {
                    n + 1
                };
            }
            if n >= self.tokens.len() {
                return Err(self.malformed(k, "expected class body"));
            }
            let body_end = self.matching(n)?;
            return Ok(DefaultExport::Anonymous { terminator: self.tokens[body_end].end });
        }

        Ok(DefaultExport::Expression)
    }

    /// Names bound by a `var`/`let`/`const` declarator list starting at `j`.
    fn declared_names(&self, mut j: usize) -> ScanResult<Vec<String>> {
        let mut names = Vec::new();
        loop {
            j = self.binding_pattern(j, &mut names)?;
            if self.is_punct(j, "=") {
                j = self.skip_initializer(j + 1)?;
            }
            if self.is_punct(j, ",") {
                j += 1;
            } else {
                return Ok(names);
            }
        }
    }

    /// Collect names from a binding pattern at `j`; returns the index after it.
    fn binding_pattern(&self, j: usize, names: &mut Vec<String>) -> ScanResult<usize> {
        match self.kind(j) {
            Some(TokenKind::Ident) => {
                names.push(self.text(j).to_string());
                Ok(j + 1)
            }
            Some(TokenKind::Punct) if self.is_punct(j, "[") => {
                let close = self.matching(j)?;
                let mut k = j + 1;
                while k < close {
                    if self.is_punct(k, ",") {
                        k += 1;
                        continue;
                    }
                    if self.is_punct(k, "...") {
                        k += 1;
                    }
                    k = self.binding_pattern(k, names)?;
                    if self.is_punct(k, "=") {
                        k = self.skip_to_separator(k + 1, close)?;
                    }
                }
                Ok(close + 1)
            }
            Some(TokenKind::Punct) if self.is_punct(j, "{") => {
                let close = self.matching(j)?;
                let mut k = j + 1;
                while k < close {
                    if self.is_punct(k, ",") {
                        k += 1;
                        continue;
                    }
                    if self.is_punct(k, "...") {
                        k = self.binding_pattern(k + 1, names)?;
                        continue;
                    }
                    let key = k;
                    k = if self.is_punct(k, "[") { self.matching(k)? + 1 } else { k + 1 };
                    if self.is_punct(k, ":") {
                        k = self.binding_pattern(k + 1, names)?;
                    } else if self.kind(key) == Some(TokenKind::Ident) {
                        names.push(self.text(key).to_string());
                    } else {
                        return Err(self.malformed(key, "invalid binding pattern"));
                    }
                    if self.is_punct(k, "=") {
                        k = self.skip_to_separator(k + 1, close)?;
                    }
                }
                Ok(close + 1)
            }
            _ => Err(self.malformed(j, "invalid binding pattern")),
        }
    }

    /// Skip a default value inside a pattern up to the next `,` or `limit`.
    fn skip_to_separator(&self, mut k: usize, limit: usize) -> ScanResult<usize> {
        while k < limit && !self.is_punct(k, ",") {
            k = if self.kind(k) == Some(TokenKind::Punct) && is_open(self.text(k)) {
                self.matching(k)? + 1
            } else {
                k + 1
            };
        }
        Ok(k)
    }

    /// Skip a declarator initializer; stops at `,` `;`, a closing bracket, or
    /// an identifier on a new line that cannot continue the expression.
    fn skip_initializer(&self, start: usize) -> ScanResult<usize> {
        let mut k = start;
        while k < self.tokens.len() {
            let token = self.tokens[k];
            let text = token.text(self.src);
            if k > start && token.newline_before && token.kind == TokenKind::Ident {
                let prev = self.tokens[k - 1];
                let prev_text = prev.text(self.src);
                let complete = match prev.kind {
                    TokenKind::Punct => matches!(prev_text, ")" | "]" | "}"),
                    _ => true,
                };
                if complete {
                    return Ok(k);
                }
            }
            if token.kind == TokenKind::Punct {
                if is_open(text) {
                    k = self.matching(k)? + 1;
                    continue;
                }
                if matches!(text, "," | ";") || is_close(text) {
                    return Ok(k);
                }
            }
            k += 1;
        }
        Ok(k)
    }
}
