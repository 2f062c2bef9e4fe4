//! Content classification: payload in, content-type label out.
//!
//! First match wins: image, absolute URL, developer content (shell prompts,
//! CLI invocations, code-like punctuation density), plain text.
//!
//! `sub_category` adds a finer tool label ("Docker", "Version Control", ...)
//! for command lines; the monitor stores it as the entry's category.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::clipboard::ClipboardPayload;
use crate::storage::models::ContentType;

static RE_SHELL_PROMPT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\$|%|❯|PS [^>\n]*>)\s+\S").ok());

static RE_COMMAND: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)^\s*(sudo\s+)?(",
        // containers / infra / cloud
        r"docker|docker-compose|podman|kubectl|helm|terraform|ansible|ansible-playbook|aws|gcloud|az|",
        // version control
        r"git|gh|svn|hg|",
        // package managers
        r"npm|npx|yarn|pnpm|bun|pip|pip3|poetry|uv|cargo|go|brew|apt|apt-get|yum|dnf|pacman|",
        // runtimes / build
        r"node|deno|python|python3|java|mvn|gradle|dotnet|rustc|rustup|make|cmake|bazel|",
        // networking / debug
        r"curl|wget|ssh|scp|rsync|ping|netstat|lsof|",
        // databases
        r"psql|mysql|redis-cli|mongo|mongosh|sqlite3",
        r")\s+\S",
    ))
    .ok()
});

static RE_SHELL_BUILTIN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    // Bare builtin, or one with at least one flag/path-looking argument.
    Regex::new(r"(?m)^\s*(cd|ls|pwd|cp|mv|rm|mkdir|chmod|chown|grep|find|export|echo)(\s*$|\s+(\S+\s+)*[-./~$])").ok()
});

static RE_POWERSHELL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(Get|Set|New|Remove|Invoke)-[A-Z]\w+").ok());

static RE_CI_YAML: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(uses:|runs-on:|steps:)").ok());

macro_rules! label_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

// ── Containers / infra / cloud ─────────────────────────────────────────────
label_pattern!(RE_DOCKER, r"(?m)^\s*(sudo\s+)?(docker|docker-compose)\s");
label_pattern!(RE_KUBERNETES, r"(?m)^\s*(kubectl|helm)\s");
label_pattern!(RE_IAC, r"(?m)^\s*(terraform|ansible|ansible-playbook)\s");
label_pattern!(RE_CLOUD_CLI, r"(?m)^\s*(aws|gcloud|az)\s");

// ── Version control ────────────────────────────────────────────────────────
label_pattern!(RE_VCS, r"(?m)^\s*(git|gh|svn)\s");

// ── Package managers ───────────────────────────────────────────────────────
label_pattern!(
    RE_PACKAGES,
    r"(?m)^\s*(sudo\s+)?(npm|npx|yarn|pnpm|pip|pip3|poetry|cargo|brew|apt|apt-get|yum|dnf)\s|(?m)^\s*go\s(mod|get|build|run)\b"
);

// ── Runtimes / build tools ─────────────────────────────────────────────────
label_pattern!(RE_RUNTIME, r"(?m)^\s*(node|python|python3|java|mvn|gradle|dotnet|rustc)\s");

// ── Shell / OS ─────────────────────────────────────────────────────────────
label_pattern!(
    RE_SHELL,
    r"(?m)^\s*(cd|ls|pwd|cp|mv|rm|cat|less|grep|find|chmod|chown)\b|(?m)^\s*zsh\s|(?m)^\s*(Get|Set|New|Remove)-\w+"
);

// ── Networking ─────────────────────────────────────────────────────────────
label_pattern!(RE_NETWORK, r"(?m)^\s*(curl|wget|http|ping|netstat|ss|lsof)\s");

// ── Databases ──────────────────────────────────────────────────────────────
label_pattern!(RE_DATABASE, r"(?m)^\s*(psql|mysql|redis-cli|mongo|sqlite3)\s");

// ── CI / build ─────────────────────────────────────────────────────────────
label_pattern!(RE_CI, r"(?m)^\s*(make|cmake|bazel)\s|(?m)^\s*(uses:|runs-on:|steps:)");

/// Checked in order; the first hit names the entry.
static LABELS: [(&str, &LazyLock<Option<Regex>>); 11] = [
    ("Docker", &RE_DOCKER),
    ("Kubernetes", &RE_KUBERNETES),
    ("IaC", &RE_IAC),
    ("Cloud CLI", &RE_CLOUD_CLI),
    ("Version Control", &RE_VCS),
    ("Package Management", &RE_PACKAGES),
    ("Runtime / Build", &RE_RUNTIME),
    ("Shell / OS", &RE_SHELL),
    ("Networking", &RE_NETWORK),
    ("Database", &RE_DATABASE),
    ("CI / Build", &RE_CI),
];

const CODE_SIGNALS: [&str; 10] = [
    "fn ", "const ", "let ", "class ", "import ", "#include", "def ", "=>", "func ", "return ",
];

const CODE_PUNCTUATION: &str = "{}[]();=<>&|$:";

pub fn classify(payload: &ClipboardPayload) -> ContentType {
    match payload {
        ClipboardPayload::Image { .. } => ContentType::Image,
        ClipboardPayload::Text(text) => classify_text(text),
    }
}

pub fn classify_text(text: &str) -> ContentType {
    if is_absolute_url(text) {
        ContentType::Url
    } else if looks_like_dev(text) {
        ContentType::Dev
    } else {
        ContentType::Text
    }
}

/// Tool label for command-line text, if any line starts with a known tool.
pub fn sub_category(text: &str) -> Option<&'static str> {
    LABELS
        .iter()
        .find(|(_, re)| matches(re, text))
        .map(|(label, _)| *label)
}

fn is_absolute_url(text: &str) -> bool {
    let candidate = text.trim();
    if candidate.is_empty() || candidate.contains(char::is_whitespace) {
        return false;
    }
    match Url::parse(candidate) {
        Ok(url) => match url.scheme() {
            "http" | "https" | "ftp" | "ftps" | "ws" | "wss" => url.has_host(),
            "file" | "mailto" => true,
            _ => false,
        },
        Err(_) => false,
    }
}

fn matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

fn looks_like_dev(text: &str) -> bool {
    matches(&RE_SHELL_PROMPT, text)
        || matches(&RE_COMMAND, text)
        || matches(&RE_SHELL_BUILTIN, text)
        || matches(&RE_POWERSHELL, text)
        || matches(&RE_CI_YAML, text)
        || is_code_dense(text)
}

fn is_code_dense(text: &str) -> bool {
    let significant = text.chars().filter(|c| !c.is_whitespace()).count();
    if significant == 0 {
        return false;
    }
    let punct = text.chars().filter(|c| CODE_PUNCTUATION.contains(*c)).count();
    let has_signal = CODE_SIGNALS.iter().any(|s| text.contains(s))
        && text.contains(['{', ';', '=']);

    // ~1 in 8 characters being structural punctuation reads as code;
    // a keyword lowers the bar.
    (punct >= 4 && punct * 8 >= significant) || (has_signal && punct >= 2)
}
