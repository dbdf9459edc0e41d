//! # dsr
//!
//! Command-line playground for the replicated DSR graph. Every scenario runs
//! several replicas inside one process, wired together through an in-memory
//! pub/sub bus that can be partitioned.
//!
//! ```text
//! world ──RT──▶ robot ◀──looks_at── camera
//! ```


use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::*;
use dsr_graph::{Edge, Node, Value};
use dsr_sync::{DsrGraph, MemoryBus, MemoryTransport, PeerId, ReplicaConfigBuilder};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

type Replica = DsrGraph<MemoryTransport>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "dsr")]
#[command(about = "Replicated CRDT property graph (Deep State Representation)")]
#[command(version)]
struct Cli {
    /// Log filter, e.g. `dsr_sync=debug` (defaults to RUST_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: a world builder and a late-joining viewer
    Demo,
    /// Conflict scenario: concurrent attribute writes kept until collapsed
    Conflict,
    /// Network partition: split, independent edits, heal, full convergence
    Partition,
    /// Random workload across many replicas, then a convergence check
    Stress {
        #[arg(long, default_value_t = 4)]
        replicas: usize,
        #[arg(long, default_value_t = 200)]
        ops: usize,
        /// Node ids are drawn from 1..=nodes
        #[arg(long, default_value_t = 32)]
        nodes: i32,
    },
}

fn init_tracing(directive: Option<&str>, default_level: LevelFilter) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ─── Replicas on a shared bus ─────────────────────────────────────────────

async fn start_replica(
    bus: &MemoryBus,
    agent_id: u32,
    name: &str,
    sync_timeout_ms: u64,
) -> dsr_sync::Result<Replica> {
    let config = ReplicaConfigBuilder::new(agent_id, name)
        .sync_timeout(sync_timeout_ms)
        .sync_poll_interval(10)
        .sync_attempts(1)
        .build();
    DsrGraph::start(config, Arc::new(bus.transport(name))).await
}

/// Wait until every replica shows the same visible graph.
pub(crate) async fn settle(replicas: &[&Replica], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let first = replicas[0].nodes();
        if replicas[1..].iter().all(|r| r.nodes() == first) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn render_values(values: &[&Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    if parts.len() > 1 {
        format!("{{{}}}", parts.join(" | "))
    } else {
        parts.join("")
    }
}

fn show_replica(replica: &Replica) {
    let border = "─".repeat(56);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^54} │",
        format!("Replica: {} ({:?})", replica.agent_name(), replica.sync_state())
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);

    let nodes = replica.nodes();
    if nodes.is_empty() {
        println!("  │ {:^54} │", "(empty graph)".dimmed().to_string());
    }
    for node in &nodes {
        let attrs: Vec<String> = node
            .attrs
            .keys()
            .map(|key| {
                let values: Vec<&Value> =
                    node.attrs.get_all(key).iter().map(|a| &a.value).collect();
                format!("{}={}", key, render_values(&values))
            })
            .collect();
        let line = format!("{:>3} {:<10} {:<8} {}", node.id, node.name, node.node_type, attrs.join(" "));
        println!("  │ {:<54} │", line);
        for edge in node.edges() {
            let target = replica
                .get_name_from_id(edge.to)
                .unwrap_or_else(|| edge.to.to_string());
            let line = format!("      ──{}──▶ {}", edge.edge_type, target);
            println!("  │ {:<54} │", line.dimmed().to_string());
        }
    }
    println!("  └{}┘", border);
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL REPLICAS CONVERGED".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED, replicas differ".bright_red().bold()
        );
    }
}

fn scene(replica: &Replica) {
    replica.insert_or_assign_node(Node::new(1, "world", "world"));
    replica.insert_or_assign_node(Node::new(2, "robot", "robot"));
    replica.insert_or_assign_node(Node::new(3, "camera", "camera"));
    replica.insert_or_assign_edge(Edge::new(1, 2, "RT"));
    replica.insert_or_assign_edge(Edge::new(3, 2, "looks_at"));
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() -> dsr_sync::Result<()> {
    header("DEMO: World Builder and Late Viewer");

    section("Phase 1: The builder starts alone and builds a scene");
    let bus = MemoryBus::new();
    let builder = start_replica(&bus, 1, "builder", 100).await?;
    step("builder: no answer to its graph request, steady on its own");
    scene(&builder);
    builder.update_attribute(2, "battery", 0.87f32);
    builder.update_attribute(3, "fps", 30);
    step("builder: world, robot, camera + RT and looks_at edges");
    show_replica(&builder);

    section("Phase 2: A viewer joins and receives the full graph");
    let viewer = start_replica(&bus, 2, "viewer", 1000).await?;
    step("viewer: graph request answered by builder");
    show_replica(&viewer);

    section("Phase 3: Live deltas in both directions");
    viewer.update_attribute(2, "battery", 0.64f32);
    step("viewer: robot.battery = 0.64");
    builder.insert_or_assign_node(Node::new(4, "gripper", "gripper"));
    builder.insert_or_assign_edge(Edge::new(2, 4, "RT"));
    step("builder: adds gripper under robot");

    let ok = settle(&[&builder, &viewer], Duration::from_secs(2)).await;
    show_replica(&builder);
    show_replica(&viewer);
    convergence_result(ok);
    Ok(())
}

// ─── Conflict ──────────────────────────────────────────────────────────────

async fn run_conflict() -> dsr_sync::Result<()> {
    header("CONFLICT: Concurrent Writes to the Same Attribute");

    let bus = MemoryBus::new();
    let r1 = start_replica(&bus, 1, "node-1", 100).await?;
    let r2 = start_replica(&bus, 2, "node-2", 1000).await?;
    let r3 = start_replica(&bus, 3, "node-3", 1000).await?;
    scene(&r1);
    settle(&[&r1, &r2, &r3], Duration::from_secs(2)).await;

    section("Phase 1: Everyone goes offline and writes robot.level");
    let replicas = [&r1, &r2, &r3];
    for r in replicas {
        bus.set_connected(&PeerId::new(r.agent_name()), false).await;
    }
    for (level, r) in (1..).zip(replicas) {
        r.update_attribute(2, "level", level);
        step(&format!("{}: robot.level = {}", r.agent_name(), level));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    section("Phase 2: Back online; every concurrent value is kept");
    for r in replicas {
        bus.set_connected(&PeerId::new(r.agent_name()), true).await;
    }
    let ok = settle(&replicas, Duration::from_secs(2)).await;
    show_replica(&r1);
    convergence_result(ok);
    if let Some(attr) = r1.get_node(2).and_then(|n| n.attrs.get("level").cloned()) {
        step(&format!(
            "typed read picks the latest write: level = {}",
            attr.value
        ));
    }

    section("Phase 3: A write that has seen them all collapses the register");
    r2.update_attribute(2, "level", 10);
    step("node-2: robot.level = 10");
    let ok = settle(&replicas, Duration::from_secs(2)).await;
    show_replica(&r3);
    convergence_result(ok);
    Ok(())
}

// ─── Partition ─────────────────────────────────────────────────────────────

async fn run_partition() -> dsr_sync::Result<()> {
    header("PARTITION: Network Split, Independent Work, Heal & Converge");

    let bus = MemoryBus::new();
    let a = start_replica(&bus, 1, "alpha", 100).await?;
    let b = start_replica(&bus, 2, "beta", 1000).await?;
    let c = start_replica(&bus, 3, "gamma", 1000).await?;
    scene(&a);
    settle(&[&a, &b, &c], Duration::from_secs(2)).await;
    step("alpha, beta, gamma share the scene");

    section("Phase 1: gamma is cut off");
    let gamma = PeerId::new(c.agent_name());
    bus.set_connected(&gamma, false).await;

    a.insert_or_assign_node(Node::new(5, "lidar", "lidar"));
    a.insert_or_assign_edge(Edge::new(5, 2, "looks_at"));
    step("alpha: adds a lidar looking at the robot");
    b.update_attribute(1, "gravity", -9.81f32);
    step("beta: world.gravity = -9.81");
    c.delete_node(3);
    step("gamma: deletes the camera (and its looks_at edge)");
    c.update_attribute(2, "battery", 0.5f32);
    step("gamma: robot.battery = 0.5");

    let diverged = !settle(&[&a, &c], Duration::from_millis(200)).await;
    step(&format!("diverged while split: {}", diverged));
    show_replica(&a);
    show_replica(&c);

    section("Phase 2: Heal");
    bus.set_connected(&gamma, true).await;
    let ok = settle(&[&a, &b, &c], Duration::from_secs(2)).await;
    show_replica(&a);
    convergence_result(ok);
    step(&format!(
        "edges into robot: {}",
        a.get_edges_to_id(2).len()
    ));
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // Random workloads are mostly rejected mutations; keep them quiet.
    let default_level = match cli.command {
        Commands::Stress { .. } => LevelFilter::ERROR,
        _ => LevelFilter::WARN,
    };
    init_tracing(cli.log.as_deref(), default_level);

    let result = match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Conflict => run_conflict().await,
        Commands::Partition => run_partition().await,
        Commands::Stress {
            replicas,
            ops,
            nodes,
        } => stress_test::run(replicas, ops, nodes).await.map(|stats| stats.print()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
