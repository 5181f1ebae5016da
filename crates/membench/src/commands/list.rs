//! List command: show the suite and the variant plan.

use membench::{ProtectionVariant, resolve};

use super::{host_from, load_registry};
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, HostArgs, SuiteArgs};
use crate::terminal::{self, Table};

pub fn cmd_list(suite: &SuiteArgs, host: &HostArgs) -> i32 {
    let registry = match load_registry(suite) {
        Ok(registry) => registry,
        Err(err) => {
            terminal::error(&err.to_string());
            return EXIT_FAILURE;
        }
    };
    let host = host_from(host);
    let plan = resolve(&host);

    let mut programs = Table::new(["Program", "Args", "Stack", "Flags"]);
    for program in &registry {
        programs.add_row(vec![
            program.name.clone(),
            program.run_args.join(" "),
            program.stack_size.to_string(),
            program.extra_flags.join(" "),
        ]);
    }
    programs.print();
    println!();

    let mut variants = Table::new(["Variant", "Label", "Runtime", "Built"]);
    for variant in ProtectionVariant::all() {
        let built = if plan.includes(variant) { "yes" } else { "no" };
        variants.add_row(vec![
            variant.id().to_string(),
            variant.label().to_string(),
            variant.runtime_source().to_string(),
            built.to_string(),
        ]);
    }
    variants.print();
    println!();

    terminal::info(&format!("Host: {host}"));
    terminal::info(&format!("{} programs", registry.len()));
    if plan.is_compile_only() {
        terminal::warning("Target cannot run on this host: compile-only mode");
    }
    EXIT_SUCCESS
}
