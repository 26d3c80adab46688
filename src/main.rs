use clap::Parser;
use std::io::{IsTerminal, Read};
use std::{fs, process};

use ember::heap::HeapOptions;
use ember::repl::Repl;
use ember::runtime::{Runtime, RuntimeOptions};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "ember")]
#[command(version = VERSION)]
#[command(about = "A small Lisp with a copying collector and an x86-64 JIT", long_about = None)]
struct Cli {
    /// Source file to load and evaluate instead of reading stdin
    file: Option<String>,

    /// Heap occupancy percentage that arms the next collection to grow
    #[arg(short = 'm', long = "memory-pct", default_value_t = 75.0)]
    memory_pct: f64,

    /// Echo input before evaluating (batch mode)
    #[arg(short, long)]
    echo: bool,

    /// Print per-cycle collector statistics
    #[arg(short = 'g', long = "verbose-gc")]
    verbose_gc: bool,

    /// Suppress the value echo after each form
    #[arg(short, long)]
    quiet: bool,

    /// Collect before every allocation, stressing the relocation paths
    #[arg(long, hide = true)]
    gc_stress: bool,

    /// Trace every evaluation step
    #[cfg(debug_assertions)]
    #[arg(short = 's', long = "stack-trace")]
    stack_trace: bool,

    /// Full debug output (implies --stack-trace)
    #[cfg(debug_assertions)]
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let opts = RuntimeOptions {
        heap: HeapOptions {
            occupancy_pct: cli.memory_pct,
            verbose_gc: cli.verbose_gc,
            stress: cli.gc_stress,
            ..Default::default()
        },
        quiet: cli.quiet,
        echo: cli.echo,
    };

    #[allow(unused_mut)]
    let mut rt = Runtime::with_options(opts);
    #[cfg(debug_assertions)]
    {
        rt.stack_trace = cli.stack_trace || cli.debug;
    }

    let mut repl = Repl::new(rt);

    if let Some(file) = cli.file {
        match fs::read_to_string(&file) {
            Ok(src) => repl.run_batch(&src),
            Err(err) => {
                eprintln!("ember: {}: {}", file, err);
                process::exit(1);
            }
        }
    } else if std::io::stdin().is_terminal() {
        repl.run();
    } else {
        let mut src = String::new();
        if let Err(err) = std::io::stdin().read_to_string(&mut src) {
            eprintln!("ember: failed to read stdin: {}", err);
            process::exit(1);
        }
        repl.run_batch(&src);
    }
}
