//! Dockerfile rendering and parsing

use berth_core::domain::image::{CopyInstruction, ImageBuildSpec, RuntimeUser};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::{RenderError, Result};

/// Renders a single-stage Dockerfile
///
/// Copies of individual files (dependency manifests) come before the
/// dependency install so the install layer is cached; whole-tree copies
/// come after the runtime user is created.
pub fn render(image: &ImageBuildSpec) -> Result<String> {
    let mut out = String::new();

    writeln!(out, "FROM {}", image.base_image).ok();
    out.push('\n');

    for (key, value) in &image.env {
        writeln!(out, "ENV {}={}", key, value).ok();
    }
    writeln!(out, "WORKDIR {}", image.workdir).ok();
    out.push('\n');

    if !image.os_packages.is_empty() {
        writeln!(out, "RUN apt-get update \\").ok();
        writeln!(
            out,
            "    && apt-get install -y --no-install-recommends {} \\",
            image.os_packages.join(" ")
        )
        .ok();
        writeln!(out, "    && rm -rf /var/lib/apt/lists/*").ok();
        out.push('\n');
    }

    let (manifests, trees): (Vec<&CopyInstruction>, Vec<&CopyInstruction>) =
        image.copy.iter().partition(|c| c.source != ".");

    for copy in &manifests {
        writeln!(out, "{}", copy_line(copy)).ok();
    }
    for command in &image.dependency_install {
        writeln!(out, "RUN {}", command).ok();
    }
    out.push('\n');

    writeln!(
        out,
        "RUN useradd --create-home --uid {} {}",
        image.user.uid, image.user.name
    )
    .ok();
    for copy in &trees {
        writeln!(out, "{}", copy_line(copy)).ok();
    }
    writeln!(out, "USER {}", image.user.name).ok();
    out.push('\n');

    writeln!(out, "EXPOSE {}", image.expose).ok();
    writeln!(out, "CMD {}", serde_json::to_string(&image.command)?).ok();

    Ok(out)
}

fn copy_line(copy: &CopyInstruction) -> String {
    match &copy.chown {
        Some(owner) => format!("COPY --chown={} {} {}", owner, copy.source, copy.destination),
        None => format!("COPY {} {}", copy.source, copy.destination),
    }
}

/// Parses a Dockerfile into an `ImageBuildSpec`
///
/// Unknown instructions are ignored. A missing `USER` leaves the image
/// running as root and a missing `EXPOSE` leaves port 0; validation
/// reports both.
pub fn parse(src: &str) -> Result<ImageBuildSpec> {
    let mut base_image = None;
    let mut image = ImageBuildSpec {
        base_image: String::new(),
        os_packages: Vec::new(),
        workdir: "/".to_string(),
        env: BTreeMap::new(),
        dependency_install: Vec::new(),
        user: RuntimeUser {
            name: "root".to_string(),
            uid: 0,
        },
        copy: Vec::new(),
        expose: 0,
        command: Vec::new(),
    };
    let mut created_users: BTreeMap<String, u32> = BTreeMap::new();
    let mut entrypoint: Vec<String> = Vec::new();

    for (line_no, line) in logical_lines(src) {
        let (instruction, args) = match line.split_once(char::is_whitespace) {
            Some((i, a)) => (i.to_ascii_uppercase(), a.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        match instruction.as_str() {
            "FROM" => {
                let image_ref = args.split_whitespace().next().unwrap_or_default();
                base_image = Some(image_ref.to_string());
            }
            "WORKDIR" => image.workdir = args.to_string(),
            "ENV" => parse_env(args, &mut image.env),
            "RUN" => parse_run(args, &mut image, &mut created_users),
            "COPY" | "ADD" => {
                if let Some(copy) = parse_copy(args) {
                    image.copy.push(copy);
                }
            }
            "USER" => {
                let name = args.split(':').next().unwrap_or(args).to_string();
                let uid = name
                    .parse::<u32>()
                    .ok()
                    .or_else(|| created_users.get(&name).copied())
                    .unwrap_or(if name == "root" { 0 } else { 1000 });
                image.user = RuntimeUser { name, uid };
            }
            "EXPOSE" => {
                let port = args
                    .split_whitespace()
                    .next()
                    .and_then(|p| p.split('/').next())
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(|| {
                        RenderError::parse("Dockerfile", line_no, format!("invalid EXPOSE '{}'", args))
                    })?;
                if image.expose == 0 {
                    image.expose = port;
                }
            }
            "CMD" => image.command = parse_command(args),
            "ENTRYPOINT" => entrypoint = parse_command(args),
            _ => {}
        }
    }

    image.base_image = base_image
        .ok_or_else(|| RenderError::parse("Dockerfile", 1, "no FROM instruction"))?;

    if !entrypoint.is_empty() {
        entrypoint.append(&mut image.command);
        image.command = entrypoint;
    }

    Ok(image)
}

/// Joins `\` continuations and drops comments, keeping the first line number
fn logical_lines(src: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (idx, raw) in src.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (trimmed.is_empty() && current.is_none()) {
            continue;
        }

        let (text, continues) = match trimmed.strip_suffix('\\') {
            Some(t) => (t.trim_end(), true),
            None => (trimmed, false),
        };

        let entry = current.get_or_insert_with(|| (idx + 1, String::new()));
        if !entry.1.is_empty() && !text.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(text);

        if !continues && let Some(done) = current.take() {
            lines.push(done);
        }
    }

    if let Some(done) = current {
        lines.push(done);
    }

    lines
}

fn parse_env(args: &str, env: &mut BTreeMap<String, String>) {
    if args.contains('=') {
        for pair in args.split_whitespace() {
            if let Some((k, v)) = pair.split_once('=') {
                env.insert(k.to_string(), v.trim_matches('"').to_string());
            }
        }
    } else if let Some((k, v)) = args.split_once(char::is_whitespace) {
        // Legacy "ENV KEY value" form
        env.insert(k.to_string(), v.trim().to_string());
    }
}

fn parse_run(args: &str, image: &mut ImageBuildSpec, users: &mut BTreeMap<String, u32>) {
    for command in args.split("&&").map(str::trim).filter(|c| !c.is_empty()) {
        let tokens: Vec<&str> = command.split_whitespace().collect();

        match tokens.as_slice() {
            ["apt-get", "update", ..] | ["apk", "update", ..] => {}
            ["rm", "-rf", path, ..] if path.starts_with("/var/lib/apt") => {}
            ["apt-get", "install", rest @ ..] | ["apk", "add", rest @ ..] => {
                image.os_packages.extend(
                    rest.iter()
                        .filter(|t| !t.starts_with('-'))
                        .map(|t| t.to_string()),
                );
            }
            ["useradd", rest @ ..] | ["adduser", rest @ ..] => {
                if let Some(name) = rest.iter().rev().find(|t| !t.starts_with('-')) {
                    let uid = rest
                        .windows(2)
                        .find(|w| matches!(w[0], "--uid" | "-u"))
                        .and_then(|w| w[1].parse::<u32>().ok())
                        .unwrap_or(1000);
                    users.insert(name.to_string(), uid);
                }
            }
            _ => image.dependency_install.push(command.to_string()),
        }
    }
}

fn parse_copy(args: &str) -> Option<CopyInstruction> {
    let mut chown = None;
    let mut paths = Vec::new();

    for token in args.split_whitespace() {
        if let Some(owner) = token.strip_prefix("--chown=") {
            chown = Some(owner.to_string());
        } else if !token.starts_with("--") {
            paths.push(token);
        }
    }

    let (destination, sources) = paths.split_last()?;
    Some(CopyInstruction {
        source: sources.join(" "),
        destination: destination.to_string(),
        chown,
    })
}

/// Exec form (`["a", "b"]`) or shell form (`a b`)
fn parse_command(args: &str) -> Vec<String> {
    if args.starts_with('[')
        && let Ok(parts) = serde_json::from_str::<Vec<String>>(args)
    {
        return parts;
    }
    args.split_whitespace().map(str::to_string).collect()
}
