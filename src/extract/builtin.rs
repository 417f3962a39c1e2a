//! Effect descriptors for `ansible.builtin` modules.

use serde_json::Value;

use super::{is_falsy, is_truthy, Category, EffectData, EffectDescriptor};

const NAMESPACE: &str = "ansible.builtin";

/// All built-in descriptors as `(fqcn, descriptor)` pairs.
pub fn descriptors() -> Vec<(String, EffectDescriptor)> {
    use Category::{
        CmdExec, ConfigChange, FileChange, InboundTransfer, NetworkChange, PackageInstall,
        SystemChange,
    };

    let table: &[(&str, EffectDescriptor)] = &[
        // inbound transfer
        ("get_url", EffectDescriptor::fixed(InboundTransfer, get_url)),
        ("git", EffectDescriptor::dynamic(git_category, git)),
        ("slurp", EffectDescriptor::fixed(InboundTransfer, slurp)),
        ("subversion", EffectDescriptor::fixed(InboundTransfer, subversion)),
        ("uri", EffectDescriptor::dynamic(uri_category, uri)),
        ("unarchive", EffectDescriptor::dynamic(unarchive_category, unarchive)),
        // command execution
        ("command", EffectDescriptor::fixed(CmdExec, command)),
        ("shell", EffectDescriptor::fixed(CmdExec, command)),
        ("raw", EffectDescriptor::fixed(CmdExec, command)),
        ("script", EffectDescriptor::fixed(CmdExec, command)),
        ("expect", EffectDescriptor::fixed(CmdExec, expect)),
        // packages
        ("apt", EffectDescriptor::fixed(PackageInstall, apt)),
        ("dnf", EffectDescriptor::fixed(PackageInstall, package)),
        ("yum", EffectDescriptor::fixed(PackageInstall, package)),
        ("package", EffectDescriptor::fixed(PackageInstall, package)),
        ("pip", EffectDescriptor::fixed(PackageInstall, pip)),
        ("dpkg_selections", EffectDescriptor::fixed(PackageInstall, package)),
        // files
        ("assemble", EffectDescriptor::fixed(FileChange, assemble)),
        ("blockinfile", EffectDescriptor::fixed(FileChange, in_file_edit)),
        ("lineinfile", EffectDescriptor::fixed(FileChange, in_file_edit)),
        ("replace", EffectDescriptor::fixed(FileChange, in_file_edit)),
        ("copy", EffectDescriptor::fixed(FileChange, copy)),
        ("template", EffectDescriptor::fixed(FileChange, copy)),
        ("file", EffectDescriptor::fixed(FileChange, file)),
        ("tempfile", EffectDescriptor::fixed(FileChange, file)),
        ("rpm_key", EffectDescriptor::fixed(FileChange, rpm_key)),
        // services, network, config
        ("service", EffectDescriptor::fixed(SystemChange, service)),
        ("systemd", EffectDescriptor::fixed(SystemChange, service)),
        ("sysvinit", EffectDescriptor::fixed(SystemChange, service)),
        ("iptables", EffectDescriptor::fixed(NetworkChange, iptables)),
        ("known_hosts", EffectDescriptor::fixed(NetworkChange, known_hosts)),
        ("debconf", EffectDescriptor::fixed(ConfigChange, debconf)),
        ("fetch", EffectDescriptor::fixed(Category::None, fetch)),
    ];

    table
        .iter()
        .map(|(name, descriptor)| (format!("{NAMESPACE}.{name}"), *descriptor))
        .collect()
}

/// Host part of a URL-shaped source, if it parses as one.
pub fn remote_host(src: &str) -> Option<String> {
    let parsed = url::Url::parse(src).ok()?;
    parsed.host_str().map(str::to_string)
}

fn is_remote_url(src: &str) -> bool {
    matches!(
        url::Url::parse(src).map(|u| u.scheme().to_string()).as_deref(),
        Ok("http" | "https" | "ftp")
    )
}

fn insecure(data: &mut EffectData, options: &Value) {
    if options.get("validate_certs").is_some_and(is_falsy) {
        data.set_flag("insecure");
    }
}

fn get_url(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("src", options, "url")
        .take("dest", options, "dest")
        .take("mode", options, "mode")
        .take("checksum", options, "checksum");
    insecure(&mut data, options);
    data
}

fn git_category(options: &Value) -> Category {
    let disabled = |key: &str| options.get(key).is_some_and(is_falsy);
    if disabled("clone") || disabled("update") {
        Category::None
    } else {
        Category::InboundTransfer
    }
}

fn git(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("src", options, "repo")
        .take("dest", options, "dest")
        .take("version", options, "version");
    data
}

fn slurp(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("src", options, "src").take("src", options, "path");
    data
}

fn subversion(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("src", options, "repo")
        .take("dest", options, "dest")
        .take("version", options, "revision");
    data
}

fn uri_category(options: &Value) -> Category {
    let method = options
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();
    match method.as_str() {
        "GET" => Category::InboundTransfer,
        "POST" | "PUT" | "PATCH" => Category::OutboundTransfer,
        _ => Category::None,
    }
}

fn uri(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    if uri_category(options) == Category::OutboundTransfer {
        data.take("dest", options, "url").take("src", options, "body");
    } else {
        data.take("src", options, "url").take("dest", options, "dest");
    }
    data.take("method", options, "method");
    insecure(&mut data, options);
    data
}

fn unarchive_category(options: &Value) -> Category {
    let remote = options.get("remote_src").is_some_and(is_truthy);
    let url_src = options
        .get("src")
        .and_then(Value::as_str)
        .is_some_and(is_remote_url);
    if remote && url_src {
        Category::InboundTransfer
    } else {
        Category::FileChange
    }
}

fn unarchive(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    if unarchive_category(options) == Category::InboundTransfer {
        data.take("src", options, "src").take("dest", options, "dest");
    } else {
        data.take("src", options, "src").take("file", options, "dest");
    }
    insecure(&mut data, options);
    data
}

/// `command`/`shell`/`raw`/`script`: free-form text, `cmd`, or `argv`.
fn command(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take_free_form("cmd", options)
        .take("cmd", options, "cmd")
        .take("cmd", options, "_raw_params");
    if let Some(Value::Array(argv)) = options.get("argv") {
        let parts: Vec<&str> = argv.iter().filter_map(Value::as_str).collect();
        if parts.len() == argv.len() {
            data.take("cmd", options, "argv");
            data.fields.insert("cmd".into(), Value::String(parts.join(" ")));
        }
    }
    data.take("chdir", options, "chdir");
    data
}

fn expect(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("cmd", options, "command");
    data
}

fn apt(options: &Value) -> EffectData {
    let mut data = package(options);
    data.take("pkg", options, "deb");
    if options.get("allow_unauthenticated").is_some_and(is_truthy) {
        data.set_flag("unauthenticated");
    }
    data
}

fn package(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("pkg", options, "pkg")
        .take("pkg", options, "name")
        .take("pkg", options, "package");
    if options.get("state").and_then(Value::as_str) == Some("absent") {
        data.set_flag("delete");
    }
    if options.get("disable_gpg_check").is_some_and(is_truthy) {
        data.set_flag("unauthenticated");
    }
    insecure(&mut data, options);
    data
}

fn pip(options: &Value) -> EffectData {
    let mut data = package(options);
    data.take("pkg", options, "requirements")
        .take("extra_args", options, "extra_args");
    data
}

fn assemble(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("file", options, "dest")
        .take("content", options, "src")
        .take("mode", options, "mode");
    data
}

fn in_file_edit(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("file", options, "dest")
        .take("file", options, "path")
        .take("content", options, "block")
        .take("content", options, "line")
        .take("mode", options, "mode");
    data
}

fn copy(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("dest", options, "dest")
        .take("src", options, "src")
        .take("src", options, "content")
        .take("mode", options, "mode");
    data
}

fn file(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("file", options, "path")
        .take("file", options, "dest")
        .take("file", options, "src")
        .take("mode", options, "mode");
    if options.get("state").and_then(Value::as_str) == Some("absent") {
        data.set_flag("delete");
    }
    data
}

fn rpm_key(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("src", options, "key");
    if options.get("state").and_then(Value::as_str) == Some("absent") {
        data.set_flag("delete");
    }
    insecure(&mut data, options);
    data
}

fn service(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("name", options, "name")
        .take("state", options, "state")
        .take("enabled", options, "enabled");
    data
}

fn iptables(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("chain", options, "chain")
        .take("jump", options, "jump")
        .take("protocol", options, "protocol")
        .take("source", options, "source")
        .take("destination", options, "destination");
    data
}

fn known_hosts(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("name", options, "name")
        .take("key", options, "key")
        .take("file", options, "path");
    data
}

fn debconf(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("name", options, "name")
        .take("question", options, "question")
        .take("value", options, "value");
    data
}

fn fetch(options: &Value) -> EffectData {
    let mut data = EffectData::default();
    data.take("src", options, "src").take("dest", options, "dest");
    data
}
