use std::{fs, path::PathBuf, process::exit};

use clap::Parser;
use log::{error, info};

use rscc::{compile, dump_ir, printer::dump_ast, serialize::encode_ir};

const SAMPLE: &str = "int main(void) { printf(\"hello, world!\\n\"); return 0; }\n";

const EXIT_IO: i32 = 5;

#[derive(Parser)]
#[command(name = "rscc", about = "Compile a small C subset to NASM x86-64 assembly")]
struct Cli {
    /// Source file; the built-in hello-world program is used when omitted.
    input: Option<PathBuf>,
    #[arg(short, long, default_value = "output.s")]
    output: PathBuf,
    #[arg(long)]
    dump_ast: bool,
    #[arg(long)]
    dump_ir: bool,
    /// Also write a bincode image of the IR to this path.
    #[arg(long)]
    emit_ir: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let source = match &cli.input {
        Some(path) => match fs::read_to_string(path) {
            Ok(src) => src,
            Err(e) => {
                eprintln!("error: cannot read {}: {}", path.display(), e);
                exit(EXIT_IO);
            }
        },
        None => {
            info!("no input given, compiling the built-in sample");
            SAMPLE.to_string()
        }
    };

    let compiled = match compile(&source) {
        Ok(c) => c,
        Err(e) => {
            if e.is_internal() {
                error!("internal compiler error during {}", e.stage());
            }
            eprint!("{}", e.report(&source));
            exit(e.exit_code());
        }
    };

    if cli.dump_ast {
        print!("{}", dump_ast(&compiled.analyzed.program));
    }
    if cli.dump_ir {
        print!("{}", dump_ir(&compiled.ir));
    }

    if let Some(path) = &cli.emit_ir {
        let written = encode_ir(&compiled.ir)
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("error: cannot write {}: {}", path.display(), e);
            exit(EXIT_IO);
        }
    }

    if let Err(e) = fs::write(&cli.output, &compiled.asm) {
        eprintln!("error: cannot write {}: {}", cli.output.display(), e);
        exit(EXIT_IO);
    }
    println!(
        "Compiled {} to {} ({} bytes)",
        cli.input
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<sample>".to_string()),
        cli.output.display(),
        compiled.asm.len()
    );
}
