//! Helm-style template engine
//!
//! Uses minijinja with strict undefined handling. Helm's Go-template
//! actions are rewritten before rendering: leading-dot paths
//! (`{{ .Values.replicaCount }}`) become plain identifiers, `if`, `range`
//! and `with` actions become blocks, and Sprig-style calls
//! (`toYaml .Values.x | nindent 4`) become filter chains. Templates may
//! also use minijinja blocks directly (`{% if .Values.autoscaling.enabled %}`).

use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use serde::Serialize;

use berth_core::domain::deployment::ValuesRecord;

use crate::error::{RenderError, Result};

/// Rendering context: `Values`, `Release` and `Chart`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateContext {
    values: serde_json::Value,
    release: Release,
    chart: ChartMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Release {
    name: String,
    namespace: String,
    service: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ChartMeta {
    name: String,
    version: String,
}

impl TemplateContext {
    /// Builds a context for `values`, installed as release `release_name`
    pub fn new(values: &ValuesRecord, release_name: &str) -> Result<Self> {
        Ok(Self {
            values: serde_json::to_value(values)?,
            release: Release {
                name: release_name.to_string(),
                namespace: values.namespace.clone(),
                service: "berth".to_string(),
            },
            chart: ChartMeta {
                name: values.app_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    fn to_value(&self) -> Value {
        Value::from_serialize(self)
    }
}

/// Template engine for chart rendering
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_filter("quote", quote);
        env.add_filter("squote", squote);
        env.add_filter("default", default_filter);
        env.add_filter("required", required);
        env.add_filter("toYaml", to_yaml);
        env.add_filter("toJson", to_json);
        env.add_filter("indent", indent);
        env.add_filter("nindent", nindent);

        Self { env }
    }

    /// Renders `template` (named `name` in errors) with `ctx`
    ///
    /// Fails on undefined references and on output that still contains
    /// template delimiters.
    pub fn render(&self, name: &str, template: &str, ctx: &TemplateContext) -> Result<String> {
        let normalized = normalize_helm(template);

        let rendered = self
            .env
            .render_str(&normalized, ctx.to_value())
            .map_err(|err| {
                match err.kind() {
                    ErrorKind::UndefinedError => RenderError::Undefined {
                        template: name.to_string(),
                        message: err.to_string(),
                    },
                    ErrorKind::SyntaxError => RenderError::Syntax {
                        template: name.to_string(),
                        message: err.to_string(),
                    },
                    _ => RenderError::Template(err),
                }
            })?;

        let placeholders = find_placeholders(&rendered);
        if !placeholders.is_empty() {
            return Err(RenderError::Unresolved {
                template: name.to_string(),
                placeholders,
            });
        }

        Ok(rendered)
    }
}

/// `quote` filter: wraps the value in double quotes
///
/// Usage: `{{ .Values.resources.limits.cpu | quote }}`
fn quote(value: Value) -> String {
    let text = text_of(&value);
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `squote` filter: wraps the value in single quotes
fn squote(value: Value) -> String {
    format!("'{}'", text_of(&value))
}

/// `default` filter: returns the fallback for none or empty values
fn default_filter(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() || value.as_str() == Some("") {
        fallback
    } else {
        value
    }
}

/// `required` filter: fails the render with `message` when the value is missing
fn required(value: Value, message: String) -> std::result::Result<Value, minijinja::Error> {
    if value.is_undefined() || value.is_none() {
        Err(minijinja::Error::new(ErrorKind::UndefinedError, message))
    } else {
        Ok(value)
    }
}

fn to_yaml(value: Value) -> std::result::Result<String, minijinja::Error> {
    serde_yaml::to_string(&value)
        .map(|yaml| yaml.trim_end().to_string())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn to_json(value: Value) -> std::result::Result<String, minijinja::Error> {
    serde_json::to_string(&value)
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// `indent` filter: prefixes every line with `width` spaces
fn indent(value: Value, width: usize) -> String {
    let pad = " ".repeat(width);
    format!("{}{}", pad, text_of(&value).replace('\n', &format!("\n{}", pad)))
}

/// `nindent` filter: `indent` preceded by a newline
fn nindent(value: Value, width: usize) -> String {
    format!("\n{}", indent(value, width))
}

fn text_of(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Go template functions rewritten as minijinja operators or filters
const GO_FUNCTIONS: [&str; 24] = [
    "toYaml", "toJson", "nindent", "indent", "quote", "squote", "default", "required", "upper",
    "lower", "trim", "title", "int", "toString", "len", "not", "eq", "ne", "lt", "gt", "le", "ge",
    "and", "or",
];

/// Objects Helm exposes at the template root
const HELM_ROOTS: [&str; 6] = ["Values", "Release", "Chart", "Capabilities", "Template", "Files"];

/// A Go block still waiting for its `{{ end }}`
#[derive(Debug, Clone, Copy)]
enum GoBlock {
    If,
    Range,
    With,
}

/// Rewrites Helm's Go-template actions into minijinja syntax
///
/// Inside `range` and `with` the Go dot is bound to `dot`. `{% %}` tags
/// only lose their leading dots.
fn normalize_helm(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut blocks = Vec::new();
    let mut remaining = template;

    while let Some(start) = remaining.find('{') {
        let (open, close) = match remaining[start..].get(..2) {
            Some("{{") => ("{{", "}}"),
            Some("{%") => ("{%", "%}"),
            _ => {
                result.push_str(&remaining[..start + 1]);
                remaining = &remaining[start + 1..];
                continue;
            }
        };

        result.push_str(&remaining[..start]);
        let tag = &remaining[start + open.len()..];
        let Some(end) = tag.find(close) else {
            result.push_str(&remaining[start..]);
            remaining = "";
            break;
        };

        let inner = &tag[..end];
        if open == "{{" {
            result.push_str(&convert_action(inner, &mut blocks));
        } else {
            result.push_str(open);
            result.push_str(&strip_leading_dots(inner));
            result.push_str(close);
        }
        remaining = &tag[end + close.len()..];
    }

    result.push_str(remaining);
    result
}

/// Converts the inside of one `{{ }}` action, keeping its trim markers
fn convert_action(inner: &str, blocks: &mut Vec<GoBlock>) -> String {
    let (left, body) = match inner.strip_prefix('-') {
        Some(rest) if rest.starts_with(char::is_whitespace) => ("-", rest),
        _ => ("", inner),
    };
    let (right, body) = match body.strip_suffix('-') {
        Some(rest) if rest.ends_with(char::is_whitespace) => ("-", rest),
        _ => ("", body),
    };
    let body = body.trim();

    // Go comment
    if body.starts_with("/*") {
        return String::new();
    }

    let (keyword, args) = body
        .split_once(char::is_whitespace)
        .map_or((body, ""), |(k, a)| (k, a.trim()));
    let block = |statement: String| format!("{{%{left} {statement} {right}%}}");

    match keyword {
        "if" => {
            blocks.push(GoBlock::If);
            block(format!("if {}", go_expr(args)))
        }
        "else" if args.is_empty() => block("else".to_string()),
        "else" if args.starts_with("if ") => block(format!("elif {}", go_expr(&args[3..]))),
        "range" => {
            blocks.push(GoBlock::Range);
            block(range_statement(args))
        }
        "with" => {
            blocks.push(GoBlock::With);
            format!(
                "{{%{left} with dot = {} %}}{{% if dot {right}%}}",
                go_expr(args)
            )
        }
        "end" => match blocks.pop() {
            Some(GoBlock::If) => block("endif".to_string()),
            Some(GoBlock::Range) => block("endfor".to_string()),
            Some(GoBlock::With) => format!("{{%{left} endif %}}{{% endwith {right}%}}"),
            None => format!("{{{{{inner}}}}}"),
        },
        variable
            if variable.starts_with('$') && (args.starts_with(":=") || args.starts_with("= ")) =>
        {
            let value = args.trim_start_matches(':').trim_start_matches('=');
            block(format!("set {} = {}", &variable[1..], go_expr(value)))
        }
        _ => format!("{{{{{left} {} {right}}}}}", go_expr(body)),
    }
}

/// `range $k, $v := X`, `range $v := X` or `range X`
fn range_statement(args: &str) -> String {
    let Some((variables, source)) = args.split_once(":=") else {
        return format!("for dot in {}", go_expr(args));
    };

    let variables: Vec<&str> = variables
        .split(',')
        .map(|v| v.trim().trim_start_matches('$'))
        .collect();
    let source = go_expr(source);

    match variables.as_slice() {
        [key, value] => format!("for {}, {} in {} | items", key, value, grouped(source)),
        _ => format!("for {} in {}", variables.join(", "), source),
    }
}

/// Converts a Go pipeline; each stage receives the previous value as its last argument
fn go_expr(expr: &str) -> String {
    let mut value: Option<String> = None;
    for stage in split_top_level(expr, |c| c == '|') {
        value = Some(go_command(stage, value));
    }
    value.unwrap_or_default()
}

fn go_command(command: &str, piped: Option<String>) -> String {
    let words = split_top_level(command, char::is_whitespace);

    match (words.as_slice(), piped) {
        ([name, args @ ..], piped)
            if GO_FUNCTIONS.contains(name) && (!args.is_empty() || piped.is_some()) =>
        {
            let mut args: Vec<String> = args.iter().map(|arg| go_arg(arg)).collect();
            args.extend(piped);
            go_call(name, args)
        }
        (_, Some(piped)) => format!("{} | {}", piped, strip_leading_dots(command)),
        ([single], None) => go_arg(single),
        _ => strip_leading_dots(command),
    }
}

fn go_call(name: &str, mut args: Vec<String>) -> String {
    let operator = match name {
        "eq" => Some("=="),
        "ne" => Some("!="),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "le" => Some("<="),
        "ge" => Some(">="),
        "and" => Some("and"),
        "or" => Some("or"),
        _ => None,
    };
    if let Some(operator) = operator {
        return format!("({})", args.join(&format!(" {} ", operator)));
    }
    if name == "not" {
        return format!("not {}", grouped(args.join(" ")));
    }

    let Some(value) = args.pop() else {
        return name.to_string();
    };
    let filter = match name {
        "toString" => "string",
        "len" => "length",
        other => other,
    };

    if args.is_empty() {
        format!("{} | {}", grouped(value), filter)
    } else {
        format!("{} | {}({})", grouped(value), filter, args.join(", "))
    }
}

fn go_arg(token: &str) -> String {
    if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return format!("({})", go_expr(inner));
    }
    if let Some(raw) = token.strip_prefix('`').and_then(|t| t.strip_suffix('`')) {
        return format!("{:?}", raw);
    }
    if token.starts_with(['"', '\'', '-']) || token.starts_with(|c: char| c.is_ascii_digit()) {
        return token.to_string();
    }

    match token {
        "nil" => "none".to_string(),
        "true" | "false" => token.to_string(),
        _ => go_path(token),
    }
}

/// `.Values.x` to `Values.x`, `$var` to `var`, `.` and `.field` to `dot`
fn go_path(path: &str) -> String {
    let path = path.strip_prefix('$').unwrap_or(path);
    if path.is_empty() || path == "." {
        return "dot".to_string();
    }

    match path.strip_prefix('.') {
        Some(rest) if HELM_ROOTS.iter().any(|root| rest.split('.').next() == Some(*root)) => {
            rest.to_string()
        }
        Some(rest) => format!("dot.{}", rest),
        None => path.to_string(),
    }
}

fn grouped(expr: String) -> String {
    if expr.contains(char::is_whitespace) {
        format!("({})", expr)
    } else {
        expr
    }
}

/// Splits on separators outside of quotes and parentheses, dropping empty parts
fn split_top_level(input: &str, is_separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            c if quote == Some(c) => quote = None,
            _ if quote.is_some() => {}
            '"' | '\'' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && is_separator(c) => {
                parts.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Drops a `.` that starts a path (`.Values`), keeping attribute access
/// (`Values.image`) and anything inside string literals
fn strip_leading_dots(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\'' if quote.is_none() => {
                quote = Some(ch);
                result.push(ch);
            }
            c if quote == Some(c) => {
                quote = None;
                result.push(ch);
            }
            '.' if quote.is_none() => {
                let prev_is_path = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | ')' | ']'));
                let next_is_upper = chars.peek().is_some_and(|c| c.is_ascii_uppercase());
                if prev_is_path || !next_is_upper {
                    result.push('.');
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Collects `{{ ... }}` / `{% ... %}` fragments left in rendered output
fn find_placeholders(rendered: &str) -> Vec<String> {
    let mut found = Vec::new();

    for line in rendered.lines() {
        let mut rest = line;
        while let Some(start) = rest.find('{') {
            let tail = &rest[start..];
            let close = match tail.get(..2) {
                Some("{{") => "}}",
                Some("{%") => "%}",
                _ => {
                    rest = &rest[start + 1..];
                    continue;
                }
            };
            let end = tail.find(close).map_or(tail.len(), |e| e + close.len());
            found.push(tail[..end].to_string());
            rest = &tail[end..];
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext::new(&ValuesRecord::banking(), "banking").unwrap()
    }

    #[test]
    fn test_helm_paths_render() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "t",
                "replicas: {{ .Values.replicaCount }}\nrelease: {{ .Release.Name }}\n",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "replicas: 2\nrelease: banking\n");
    }

    #[test]
    fn test_nested_values() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "{{ .Values.image.repository }}:{{ .Values.image.tag }}", &ctx())
            .unwrap();
        assert_eq!(out, "registry.example.com/banking:latest");
    }

    #[test]
    fn test_quote_filter() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "cpu: {{ .Values.resources.limits.cpu | quote }}", &ctx())
            .unwrap();
        assert_eq!(out, "cpu: \"500m\"");
    }

    #[test]
    fn test_if_block_with_helm_path() {
        let engine = TemplateEngine::new();
        let template = "{% if .Values.autoscaling.enabled %}hpa{% else %}none{% endif %}";
        assert_eq!(engine.render("t", template, &ctx()).unwrap(), "none");
    }

    #[test]
    fn test_undefined_value_is_an_error() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("deployment.yaml", "{{ .Values.missingKey }}", &ctx())
            .unwrap_err();
        assert!(matches!(err, RenderError::Undefined { .. }));
    }

    #[test]
    fn test_literal_dots_are_kept() {
        assert_eq!(
            normalize_helm("{{ .Values.a | default(\".Values\") }} .Values"),
            "{{ Values.a | default(\".Values\") }} .Values"
        );
        assert_eq!(strip_leading_dots(" x.Values "), " x.Values ");
    }

    #[test]
    fn test_go_if_else_end() {
        let engine = TemplateEngine::new();
        let template = "{{- if .Values.autoscaling.enabled }}\nhpa\n{{- else }}\nnone\n{{- end }}\n";
        assert_eq!(
            normalize_helm(template),
            "{%- if Values.autoscaling.enabled %}\nhpa\n{%- else %}\nnone\n{%- endif %}\n"
        );
        assert_eq!(engine.render("t", template, &ctx()).unwrap(), "\nnone\n");
    }

    #[test]
    fn test_go_comparisons_and_else_if() {
        let engine = TemplateEngine::new();
        let template = "{{ if eq .Values.service.type \"NodePort\" }}node{{ else if not .Values.autoscaling.enabled }}fixed{{ end }}";
        assert_eq!(engine.render("t", template, &ctx()).unwrap(), "fixed");
    }

    #[test]
    fn test_go_pipelines_become_filters() {
        assert_eq!(
            normalize_helm("{{- toYaml .Values.resources | nindent 12 }}"),
            "{{- (Values.resources | toYaml) | nindent(12) }}"
        );
        assert_eq!(
            normalize_helm("{{ .Values.x | default \"a\" | quote }}"),
            "{{ (Values.x | default(\"a\")) | quote }}"
        );

        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "limits:{{ toYaml .Values.resources.limits | nindent 2 }}\n", &ctx())
            .unwrap();
        assert!(out.starts_with("limits:\n  "));
        assert!(out.contains("\n  cpu: 500m"));
        assert!(out.contains("\n  memory: 512Mi"));
    }

    #[test]
    fn test_go_with_and_range_bind_dot() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "t",
                "{{ with .Values.image }}{{ .repository }}:{{ .tag }}{{ end }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "registry.example.com/banking:latest");

        let out = engine
            .render(
                "t",
                "{{- range $name, $value := .Values.resources.limits }}{{ $name }}={{ $value }};{{- end }}",
                &ctx(),
            )
            .unwrap();
        assert!(out.contains("cpu=500m;"));
        assert!(out.contains("memory=512Mi;"));
    }

    #[test]
    fn test_go_comment_and_variable() {
        let engine = TemplateEngine::new();
        let template = "{{/* app name */}}{{ $name := .Values.appName }}{{ $name | upper }}";
        assert_eq!(engine.render("t", template, &ctx()).unwrap(), "BANKING");
    }

    #[test]
    fn test_unknown_go_function_is_a_syntax_error() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("deployment.yaml", "{{ include \"app.labels\" . }}", &ctx())
            .unwrap_err();
        assert!(matches!(err, RenderError::Syntax { ref template, .. } if template == "deployment.yaml"));
    }

    #[test]
    fn test_find_placeholders() {
        assert!(find_placeholders("plain: {text}").is_empty());
        assert_eq!(find_placeholders("a: {{ x }} b"), vec!["{{ x }}"]);
        assert_eq!(find_placeholders("a: {% if"), vec!["{% if"]);
    }
}
