//! Plan and summary display

use colored::{ColoredString, Colorize};
use declarative::{Change, ExecuteSummary, Plan, PlannedChange};
use std::collections::BTreeMap;

use super::Operation;

fn symbol(change: Change) -> ColoredString {
    let symbol = change.symbol();
    match change {
        Change::Create => symbol.green(),
        Change::Update => symbol.yellow(),
        Change::Replace => symbol.magenta(),
        Change::Delete => symbol.red(),
        Change::Unknown => symbol.cyan(),
        Change::NoChange => symbol.dimmed(),
    }
}

fn type_heading(resource_type: &str) -> &str {
    match resource_type {
        "host:command" => "Commands",
        "host:file" => "Files",
        "host:iommu" => "IOMMU",
        "host:reboot" => "Reboots",
        "host:wait" => "Reachability",
        "proxmox:user" => "API users",
        "proxmox:token" => "API tokens",
        "proxmox:vm-start" => "VM power",
        "proxmox:vm-ip" => "VM addresses",
        "proxmox:iso" => "ISO images",
        "proxmox:disk" => "Disks",
        "kube:config" => "Kubeconfigs",
        _ => resource_type,
    }
}

fn line(planned: &PlannedChange) -> String {
    let blocked = if planned.is_blocked() {
        format!(" {}", "[protected]".red())
    } else {
        String::new()
    };
    format!(
        "│   {} {:<32} {}{}",
        symbol(planned.change),
        planned.name,
        planned.description.dimmed(),
        blocked
    )
}

/// Render the pending changes of a plan, grouped by resource type.
pub fn render_plan(plan: &Plan) -> String {
    if !plan.has_changes() {
        return format!("  {} No changes needed\n", "✓".green());
    }

    let mut by_type: BTreeMap<&str, Vec<&PlannedChange>> = BTreeMap::new();
    for planned in plan.pending() {
        by_type
            .entry(planned.resource_type.as_str())
            .or_default()
            .push(planned);
    }

    let mut out = Vec::new();
    out.push(format!(
        "┌─ {} ─────────────────────────────────────────┐",
        format!("Plan: {}", plan.stack).bold()
    ));
    out.push("│".to_string());
    for (resource_type, changes) in by_type {
        out.push(format!("│ {}", type_heading(resource_type).bold()));
        out.extend(changes.into_iter().map(line));
        out.push("│".to_string());
    }

    let summary = plan.summary();
    let mut counts = Vec::new();
    for (count, label) in [
        (summary.creates, "to create"),
        (summary.updates, "to update"),
        (summary.replaces, "to replace"),
        (summary.deletes, "to delete"),
        (summary.unknown, "unknown until apply"),
    ] {
        if count > 0 {
            counts.push(format!("{count} {label}"));
        }
    }
    out.push("├─────────────────────────────────────────────────────┤".to_string());
    out.push(format!(
        "│ Summary: {} ({} unchanged)",
        counts.join(", ").bold(),
        summary.unchanged
    ));
    if summary.blocked > 0 {
        out.push(format!(
            "│ {} {} protected resources will be refused",
            "⚠".yellow(),
            summary.blocked
        ));
    }
    out.push("└─────────────────────────────────────────────────────┘".to_string());
    out.push(String::new());
    out.join("\n")
}

pub fn display_plan(plan: &Plan) {
    println!();
    print!("{}", render_plan(plan));
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary, operation: Operation) {
    println!();
    let verb = match operation {
        Operation::Apply => "applied",
        Operation::Destroy => "destroyed",
    };
    if summary.is_success() {
        println!("  {} Stack {verb} successfully!", "✓".green().bold());
    } else {
        println!("  {} Stack {verb} with errors", "⚠".yellow().bold());
    }

    for (count, label) in [
        (summary.created, "created"),
        (summary.modified, "modified"),
        (summary.replaced, "replaced"),
        (summary.removed, "removed"),
        (summary.skipped, "skipped"),
    ] {
        if count > 0 {
            println!("    • {count} resources {label}");
        }
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(name: &str, resource_type: &str, change: Change, protect: bool) -> PlannedChange {
        PlannedChange {
            name: name.into(),
            resource_type: resource_type.into(),
            description: format!("describe {name}"),
            change,
            protect,
        }
    }

    #[test]
    fn test_render_groups_pending_changes() {
        colored::control::set_override(false);
        let plan = Plan {
            stack: "lab".into(),
            changes: vec![
                planned("host-repos", "host:command", Change::NoChange, false),
                planned("api-token", "proxmox:token", Change::Create, false),
                planned("vm-kube1", "host:command", Change::Replace, true),
                planned("vm-old-ip", "proxmox:vm-ip", Change::Delete, false),
            ],
        };

        let out = render_plan(&plan);
        assert!(out.contains("Plan: lab"));
        assert!(out.contains("│ API tokens"));
        assert!(out.contains("│   + api-token"));
        assert!(out.contains("[protected]"));
        assert!(!out.contains("host-repos"));
        assert!(out.contains("Summary: 1 to create, 1 to replace, 1 to delete (1 unchanged)"));
        assert!(out.contains("1 protected resources will be refused"));
    }

    #[test]
    fn test_render_without_changes() {
        colored::control::set_override(false);
        let plan = Plan {
            stack: "lab".into(),
            changes: vec![planned("host-repos", "host:command", Change::NoChange, false)],
        };
        assert_eq!(render_plan(&plan), "  ✓ No changes needed\n");
    }
}
