//! Trace the relaxation core over small built-in units.
//!
//! Run with `RUST_LOG=trace` to see every pass and every liveness decision.

use bumpalo::Bump;
use clap::{Parser, ValueEnum};

use nds32_relax::nds32::{Insn, Opcode, PicFlavor, Reg, SymOperand};
use nds32_relax::{Assembler, AssemblySession, RelaxConfig, RelaxResult, SourceLoc};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Conditional branch over a gap of raw bytes.
    Branch,
    /// Call to a symbol defined outside the unit.
    External,
    /// `sethi`/`ori` of a function address feeding a register call.
    Idiom,
}

#[derive(Debug, Parser)]
#[command(name = "trace_relax", about = "Trace NDS32 branch relaxation and idiom contraction")]
struct Args {
    #[arg(value_enum, default_value = "branch")]
    scenario: Scenario,

    /// Bytes between the branch and its target.
    #[arg(long, default_value_t = 300)]
    gap: u32,

    /// Disable size optimizations (compaction and contraction).
    #[arg(long)]
    no_optimize: bool,

    #[arg(long, default_value_t = 64)]
    max_passes: usize,

    #[arg(long, default_value_t = 4)]
    fanout: u32,
}

fn build(asm: &mut Assembler<'_, '_>, args: &Args) -> RelaxResult<()> {
    let mut line = 0;
    let mut loc = || {
        line += 1;
        SourceLoc::new(line)
    };
    let r = |n: u8| Reg::new(n).unwrap_or(Reg::TA);
    match args.scenario {
        Scenario::Branch => {
            let target = asm.symbol("far");
            asm.emit(Insn::branch_zero(Opcode::Beqz, r(1), target), loc())?;
            asm.data(&vec![0x92; args.gap as usize], loc());
            asm.label("far", loc());
            asm.emit(Insn::ret(), loc())?;
        }
        Scenario::External => {
            let target = asm.symbol("printf");
            asm.emit(Insn::jal(target), loc())?;
            asm.emit(Insn::ret(), loc())?;
        }
        Scenario::Idiom => {
            let func = asm.symbol("callee");
            asm.emit(Insn::sethi(Reg::TA, 0).with_sym(SymOperand::hi20(func, PicFlavor::Abs)), loc())?;
            asm.emit(Insn::ori(Reg::TA, Reg::TA, 0).with_sym(SymOperand::lo12(func, PicFlavor::Abs)), loc())?;
            asm.emit(Insn::jral(Reg::TA), loc())?;
            asm.emit(Insn::alu(Opcode::Add, r(0), r(0), r(1)), loc())?;
            asm.emit(Insn::ret(), loc())?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = if args.no_optimize {
        RelaxConfig::no_optimize()
    } else {
        RelaxConfig::default()
    }
    .with_max_relax_passes(args.max_passes)
    .with_max_call_fanout(args.fanout);

    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let mut asm = Assembler::new(&session, config);
    if let Err(e) = build(&mut asm, &args) {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
    let unit = match asm.finish() {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    for diag in unit.diagnostics.iter() {
        eprintln!("{}", diag);
    }
    for section in &unit.sections {
        println!("📦 {} ({} bytes)", section.name, section.bytes.len());
        for chunk in section.bytes.chunks(16).take(4) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            println!("   {}", hex.join(" "));
        }
        for record in &section.relocs {
            let name = record.symbol.map(|s| unit.symbol_name(s)).unwrap_or("-");
            println!("   {:#06x} {} {}", record.offset, record, name);
        }
    }
    println!("📊 {}", unit.stats);
    if unit.diagnostics.has_errors() {
        std::process::exit(1);
    }
}
