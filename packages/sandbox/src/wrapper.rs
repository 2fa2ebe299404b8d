// ABOUTME: Assembles the runnable agent source from a user program
// ABOUTME: Merges imports into one block, adds the LLM proxy helper and the webhook server suffix

use crate::settings::OrchestratorSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Imports every wrapped program gets; the server suffix relies on `express`.
pub const FRAMEWORK_IMPORTS: &[&str] = &["import express from 'express';"];

const IMPORTS_BEGIN: &str = "// @voxcraft:imports:begin";
const IMPORTS_END: &str = "// @voxcraft:imports:end";
const PREAMBLE_BEGIN: &str = "// @voxcraft:preamble:begin";
const PREAMBLE_END: &str = "// @voxcraft:preamble:end";
const USER_BEGIN: &str = "// @voxcraft:user:begin";
const USER_END: &str = "// @voxcraft:user:end";
const SERVER_BEGIN: &str = "// @voxcraft:server:begin";
const SERVER_END: &str = "// @voxcraft:server:end";

const USER_BINDING: &str = "__userAssistant";

/// Longest multi-line import statement we try to reassemble
const MAX_IMPORT_LINES: usize = 64;

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)^import\s*([^'"]+?)\s*\bfrom\s*['"]([^'"]+)['"]\s*;?\s*(//[^\n]*)?$"#)
        .expect("valid regex")
});

static IMPORT_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^import\s*['"]([^'"]+)['"]\s*;?\s*(//.*)?$"#).expect("valid regex")
});

static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*)export\s+default\s+").expect("valid regex"));

static RESTORE_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m)^(\s*)const {} = ", USER_BINDING)).expect("valid regex")
});

/// Bindings one module contributes to the merged import block
#[derive(Debug, Default, Clone, PartialEq)]
struct ModuleBindings {
    defaults: Vec<String>,
    namespaces: Vec<String>,
    named: Vec<String>,
}

impl ModuleBindings {
    fn merge(&mut self, other: &ModuleBindings) {
        push_all_unique(&mut self.defaults, &other.defaults);
        push_all_unique(&mut self.namespaces, &other.namespaces);
        push_all_unique(&mut self.named, &other.named);
    }
}

fn push_all_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Ordered set of imports keyed by module specifier
#[derive(Debug, Default)]
struct ImportBlock {
    modules: Vec<(String, ModuleBindings)>,
}

impl ImportBlock {
    fn add(&mut self, specifier: &str, bindings: ModuleBindings) {
        match self.modules.iter_mut().find(|(spec, _)| spec == specifier) {
            Some((_, existing)) => existing.merge(&bindings),
            None => self.modules.push((specifier.to_string(), bindings)),
        }
    }

    fn render(&self) -> String {
        let mut lines = Vec::new();

        for (specifier, bindings) in &self.modules {
            let module = format!("'{}'", specifier);
            let start = lines.len();
            let mut defaults = bindings.defaults.iter();

            match (defaults.next(), bindings.named.is_empty()) {
                (Some(default), true) => lines.push(format!("import {} from {};", default, module)),
                (Some(default), false) => lines.push(format!(
                    "import {}, {{ {} }} from {};",
                    default,
                    bindings.named.join(", "),
                    module
                )),
                (None, false) => lines.push(format!(
                    "import {{ {} }} from {};",
                    bindings.named.join(", "),
                    module
                )),
                (None, true) => {}
            }
            for default in defaults {
                lines.push(format!("import {} from {};", default, module));
            }
            for namespace in &bindings.namespaces {
                lines.push(format!("import * as {} from {};", namespace, module));
            }
            if lines.len() == start {
                lines.push(format!("import {};", module));
            }
        }

        lines.join("\n")
    }
}

/// Parse the text between `import` and `from`
fn parse_clause(clause: &str) -> ModuleBindings {
    let mut bindings = ModuleBindings::default();
    let mut outside = clause.to_string();

    if let (Some(open), Some(close)) = (clause.find('{'), clause.rfind('}')) {
        if open < close {
            for name in clause[open + 1..close].split(',') {
                let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
                if !name.is_empty() && !bindings.named.contains(&name) {
                    bindings.named.push(name);
                }
            }
            outside = format!("{}{}", &clause[..open], &clause[close + 1..]);
        }
    }

    for part in outside.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(rest) = part.strip_prefix('*') {
            if let Some(namespace) = rest.trim().strip_prefix("as") {
                let namespace = namespace.trim();
                if !namespace.is_empty() {
                    bindings.namespaces.push(namespace.to_string());
                }
            }
        } else {
            bindings.defaults.push(part.to_string());
        }
    }

    bindings
}

fn starts_import_statement(line: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix("import") {
        Some(rest) => matches!(
            rest.chars().next(),
            Some(c) if c.is_whitespace() || c == '{' || c == '*' || c == '\'' || c == '"'
        ),
        None => false,
    }
}

/// Split user text into the import statements it declares and the remaining body
fn extract_imports(source: &str, block: &mut ImportBlock) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut body = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if !starts_import_statement(lines[i]) {
            body.push(lines[i]);
            i += 1;
            continue;
        }

        let mut consumed = None;
        let window_end = (i + MAX_IMPORT_LINES).min(lines.len());
        for j in i..window_end {
            if j > i && starts_import_statement(lines[j]) {
                break;
            }
            let candidate = lines[i..=j].join("\n");
            let candidate = candidate.trim();

            if let Some(caps) = IMPORT_FROM.captures(candidate) {
                block.add(&caps[2], parse_clause(&caps[1]));
                consumed = Some(j);
                break;
            }
            if let Some(caps) = IMPORT_BARE.captures(candidate) {
                block.add(&caps[1], ModuleBindings::default());
                consumed = Some(j);
                break;
            }
        }

        match consumed {
            Some(j) => i = j + 1,
            None => {
                // Not a statement we understand; leave it where it was
                body.push(lines[i]);
                i += 1;
            }
        }
    }

    let body: Vec<&str> = body
        .into_iter()
        .skip_while(|line| line.trim().is_empty())
        .collect();
    body.join("\n").trim_end().to_string()
}

/// Recover the user program from previously wrapped output
fn unwrap_source(source: &str) -> Cow<'_, str> {
    let section = |begin: &str, end: &str| -> Option<&str> {
        let start = source.find(begin)? + begin.len();
        let stop = source[start..].find(end)? + start;
        Some(&source[start..stop])
    };

    match (
        section(IMPORTS_BEGIN, IMPORTS_END),
        section(USER_BEGIN, USER_END),
    ) {
        (Some(imports), Some(body)) => {
            let body = RESTORE_DEFAULT.replace(body, "${1}export default ");
            Cow::Owned(format!("{}\n\n{}", imports.trim(), body.trim_matches('\n')))
        }
        _ => Cow::Borrowed(source),
    }
}

/// Build the final deployable source for `project_id`.
///
/// Wrapping is idempotent: already-wrapped input is unwrapped first, so the
/// preamble and server suffix appear exactly once.
pub fn wrap_source(project_id: &str, source: &str, settings: &OrchestratorSettings) -> String {
    let source = unwrap_source(source);

    let mut block = ImportBlock::default();
    for statement in FRAMEWORK_IMPORTS {
        extract_imports(statement, &mut block);
    }
    let body = extract_imports(&source, &mut block);
    let body = EXPORT_DEFAULT.replacen(&body, 1, format!("${{1}}const {} = ", USER_BINDING));

    format!(
        "{}\n{}\n{}\n\n{}\n{}\n{}\n\n{}\n{}\n{}\n\n{}\n{}\n{}\n",
        IMPORTS_BEGIN,
        block.render(),
        IMPORTS_END,
        PREAMBLE_BEGIN,
        preamble(project_id, &settings.generation_proxy_url),
        PREAMBLE_END,
        USER_BEGIN,
        body,
        USER_END,
        SERVER_BEGIN,
        server_suffix(settings.app_port),
        SERVER_END,
    )
}

fn preamble(project_id: &str, proxy_url: &str) -> String {
    let project_literal =
        serde_json::to_string(project_id).unwrap_or_else(|_| "\"\"".to_string());
    let proxy_literal = serde_json::to_string(proxy_url.trim_end_matches('/'))
        .unwrap_or_else(|_| "\"\"".to_string());

    format!(
        r#"const PROJECT_ID = {project_literal};
const GENERATION_PROXY_URL = {proxy_literal};

/**
 * @typedef {{Object}} ChatMessage
 * @property {{'system' | 'user' | 'assistant'}} role
 * @property {{string}} content
 */

/**
 * @typedef {{Object}} LLMRequest
 * @property {{ChatMessage[]}} messages
 * @property {{string}} [model]
 * @property {{number}} [temperature]
 * @property {{number}} [maxTokens]
 */

/**
 * @typedef {{Object}} CallEvent
 * @property {{string}} type
 * @property {{Object}} [call]
 * @property {{ChatMessage[]}} [messages]
 */

/**
 * @typedef {{Object}} AssistantDefinition
 * @property {{Object}} [assistant]
 * @property {{(event: CallEvent, ctx: {{ projectId: string, callLLM: typeof callLLM }}) => Promise<Object>}} [onMessage]
 */

/**
 * Forward a structured request to the generation proxy for this project.
 * @param {{LLMRequest}} request
 * @returns {{Promise<any>}}
 */
async function callLLM(request) {{
  const response = await fetch(`${{GENERATION_PROXY_URL}}/api/projects/${{PROJECT_ID}}/llm`, {{
    method: 'POST',
    headers: {{ 'Content-Type': 'application/json' }},
    body: JSON.stringify(request),
  }});
  if (!response.ok) {{
    throw new Error(`callLLM failed with status ${{response.status}}`);
  }}
  return response.json();
}}"#
    )
}

fn server_suffix(port: u16) -> String {
    format!(
        r#"const __handler = typeof {USER_BINDING} !== 'undefined' && {USER_BINDING} ? {USER_BINDING} : {{}};
const __app = express();
__app.use(express.json({{ limit: '1mb' }}));

__app.get('/health', (_req, res) => {{
  res.status(200).json({{ status: 'ok', projectId: PROJECT_ID }});
}});

__app.post('/webhook', async (req, res) => {{
  const event = (req.body && req.body.message) || req.body || {{}};
  try {{
    if (event.type === 'assistant-request') {{
      return res.json({{ assistant: __handler.assistant || __handler }});
    }}
    if (typeof __handler.onMessage === 'function') {{
      const result = await __handler.onMessage(event, {{ projectId: PROJECT_ID, callLLM }});
      return res.json(result ?? {{}});
    }}
    return res.json({{}});
  }} catch (err) {{
    console.error('webhook handler failed:', err && err.stack ? err.stack : err);
    return res.status(500).json({{ error: String(err && err.message ? err.message : err) }});
  }}
}});

__app.listen({port}, '0.0.0.0', () => {{
  console.log(`agent ${{PROJECT_ID}} listening on port {port}`);
}});"#
    )
}
