//! State inspection
//!
//! Read-only snapshots of the pool plus the two textual renderings the
//! admin surface exposes: a human-readable dump and a structured XML dump.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::ProcessMetrics;
use std::fmt::Write as _;
use std::time::Instant;

use crate::core::group::Group;
use crate::core::process::Process;
use crate::pool::PoolInner;

/// Rendering controls for [`Pool::inspect`](crate::pool::Pool::inspect)
#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    /// Wrap section headers in ANSI color codes
    pub colorize: bool,
    /// Include per-process identifiers and state machines
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub gupid: String,
    pub group: String,
    pub enabled: &'static str,
    pub life_status: &'static str,
    pub sessions: u32,
    pub concurrency: u32,
    pub processed: u64,
    pub busyness: u64,
    pub last_used_ago_ms: u64,
    pub metrics: ProcessMetrics,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub name: String,
    /// Present only when secrets were requested
    pub secret: Option<String>,
    pub app_root: String,
    pub life_status: &'static str,
    pub restarting: bool,
    pub spawning: bool,
    pub processes_being_spawned: u32,
    pub waitlist_size: usize,
    pub enabled_count: u32,
    pub disabling_count: u32,
    pub disabled_count: u32,
    pub processes: Vec<ProcessSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub life_status: &'static str,
    pub max: u32,
    pub capacity_used: u32,
    pub process_count: u32,
    pub group_count: u32,
    pub get_wait_list_size: usize,
    pub groups: Vec<GroupSnapshot>,
}

impl Process {
    pub(crate) fn snapshot(&self, group: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid: self.pid(),
            gupid: self.gupid().to_string(),
            group: group.to_string(),
            enabled: self.enabled().as_str(),
            life_status: self.life_status().as_str(),
            sessions: self.sessions(),
            concurrency: self.concurrency(),
            processed: self.processed(),
            busyness: self.busyness(),
            last_used_ago_ms: Instant::now()
                .saturating_duration_since(self.last_used())
                .as_millis() as u64,
            metrics: self.metrics().clone(),
            creation_time: self.handle().creation_time,
        }
    }
}

impl Group {
    pub(crate) fn snapshot(&self, include_secret: bool) -> GroupSnapshot {
        GroupSnapshot {
            name: self.name().to_string(),
            secret: include_secret.then(|| self.secret().to_string()),
            app_root: self.options().app_root.clone(),
            life_status: self.life_status().as_str(),
            restarting: self.is_restarting(),
            spawning: self.is_spawning(),
            processes_being_spawned: self.processes_being_spawned,
            waitlist_size: self.get_waitlist.len(),
            enabled_count: self.enabled_count(),
            disabling_count: self.disabling_count(),
            disabled_count: self.disabled_count(),
            processes: self
                .processes()
                .map(|p| p.snapshot(self.name()))
                .collect(),
        }
    }
}

pub(crate) fn pool_snapshot(inner: &PoolInner, include_secrets: bool) -> PoolSnapshot {
    let mut groups: Vec<GroupSnapshot> = inner
        .groups
        .values()
        .map(|g| g.snapshot(include_secrets))
        .collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    PoolSnapshot {
        life_status: inner.life_status.as_str(),
        max: inner.max,
        capacity_used: inner.capacity_used(),
        process_count: inner.groups.values().map(|g| g.process_count()).sum(),
        group_count: inner.groups.len() as u32,
        get_wait_list_size: inner.get_waitlist.len(),
        groups,
    }
}

const ANSI_BOLD_BLUE: &str = "\x1b[1;34m";
const ANSI_RESET: &str = "\x1b[0m";

fn header(out: &mut String, text: &str, colorize: bool) {
    if colorize {
        let _ = writeln!(out, "{ANSI_BOLD_BLUE}----------- {text} -----------{ANSI_RESET}");
    } else {
        let _ = writeln!(out, "----------- {text} -----------");
    }
}

fn format_uptime(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn format_bytes(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{}M", bytes / MB)
    } else {
        format!("{}K", bytes / 1024)
    }
}

/// Human-readable dump of the whole pool
pub(crate) fn render_inspect(snapshot: &PoolSnapshot, options: &InspectOptions) -> String {
    let mut out = String::new();

    header(&mut out, "General information", options.colorize);
    let _ = writeln!(out, "Max pool size : {}", snapshot.max);
    let _ = writeln!(out, "App groups    : {}", snapshot.group_count);
    let _ = writeln!(out, "Processes     : {}", snapshot.process_count);
    let _ = writeln!(out, "Capacity used : {}", snapshot.capacity_used);
    let _ = writeln!(
        out,
        "Requests in top-level queue : {}",
        snapshot.get_wait_list_size
    );
    if options.verbose {
        let _ = writeln!(out, "Life status   : {}", snapshot.life_status);
    }
    let _ = writeln!(out);

    header(&mut out, "Application groups", options.colorize);
    for group in &snapshot.groups {
        let mut flags = Vec::new();
        if group.restarting {
            flags.push("restarting");
        }
        if group.spawning {
            flags.push("spawning");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        let _ = writeln!(out, "{} ({}){}:", group.name, group.life_status, flags);
        let _ = writeln!(out, "  App root: {}", group.app_root);
        let _ = writeln!(out, "  Requests in queue: {}", group.waitlist_size);
        if options.verbose {
            let _ = writeln!(
                out,
                "  Enabled/disabling/disabled: {}/{}/{}  Being spawned: {}",
                group.enabled_count,
                group.disabling_count,
                group.disabled_count,
                group.processes_being_spawned
            );
        }
        for process in &group.processes {
            let _ = writeln!(
                out,
                "  * PID: {:<6} Sessions: {:<3} Processed: {:<5} Uptime: {}",
                process.pid,
                process.sessions,
                process.processed,
                format_uptime(process.metrics.uptime_secs)
            );
            let _ = writeln!(
                out,
                "    CPU: {:.0}%   Memory: {}   Last used: {}s ago",
                process.metrics.cpu_percent,
                format_bytes(process.metrics.rss_bytes),
                process.last_used_ago_ms / 1000
            );
            if options.verbose {
                let _ = writeln!(
                    out,
                    "    Gupid: {}   State: {}/{}",
                    process.gupid, process.enabled, process.life_status
                );
            }
        }
        let _ = writeln!(out);
    }

    out
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Structured XML dump of the whole pool
pub(crate) fn render_xml(snapshot: &PoolSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(out, r#"<pool version="1">"#);
    let _ = writeln!(out, "  <life_status>{}</life_status>", snapshot.life_status);
    let _ = writeln!(out, "  <max>{}</max>", snapshot.max);
    let _ = writeln!(out, "  <capacity_used>{}</capacity_used>", snapshot.capacity_used);
    let _ = writeln!(out, "  <process_count>{}</process_count>", snapshot.process_count);
    let _ = writeln!(
        out,
        "  <get_wait_list_size>{}</get_wait_list_size>",
        snapshot.get_wait_list_size
    );
    let _ = writeln!(out, "  <groups>");
    for group in &snapshot.groups {
        let _ = writeln!(out, "    <group>");
        let _ = writeln!(out, "      <name>{}</name>", xml_escape(&group.name));
        let _ = writeln!(out, "      <app_root>{}</app_root>", xml_escape(&group.app_root));
        if let Some(secret) = &group.secret {
            let _ = writeln!(out, "      <secret>{}</secret>", xml_escape(secret));
        }
        let _ = writeln!(out, "      <life_status>{}</life_status>", group.life_status);
        let _ = writeln!(out, "      <restarting>{}</restarting>", group.restarting);
        let _ = writeln!(
            out,
            "      <processes_being_spawned>{}</processes_being_spawned>",
            group.processes_being_spawned
        );
        let _ = writeln!(out, "      <get_wait_list_size>{}</get_wait_list_size>", group.waitlist_size);
        let _ = writeln!(out, "      <processes>");
        for process in &group.processes {
            let _ = writeln!(out, "        <process>");
            let _ = writeln!(out, "          <pid>{}</pid>", process.pid);
            let _ = writeln!(out, "          <gupid>{}</gupid>", xml_escape(&process.gupid));
            let _ = writeln!(out, "          <enabled>{}</enabled>", process.enabled);
            let _ = writeln!(out, "          <life_status>{}</life_status>", process.life_status);
            let _ = writeln!(out, "          <sessions>{}</sessions>", process.sessions);
            let _ = writeln!(out, "          <concurrency>{}</concurrency>", process.concurrency);
            let _ = writeln!(out, "          <processed>{}</processed>", process.processed);
            let _ = writeln!(
                out,
                "          <last_used_ago_ms>{}</last_used_ago_ms>",
                process.last_used_ago_ms
            );
            let _ = writeln!(out, "          <cpu>{:.1}</cpu>", process.metrics.cpu_percent);
            let _ = writeln!(out, "          <rss>{}</rss>", process.metrics.rss_bytes);
            let _ = writeln!(out, "        </process>");
        }
        let _ = writeln!(out, "      </processes>");
        let _ = writeln!(out, "    </group>");
    }
    let _ = writeln!(out, "  </groups>");
    let _ = writeln!(out, "</pool>");
    out
}
