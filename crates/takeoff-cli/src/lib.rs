use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use takeoff_core::formula::VariableInfo;
use takeoff_core::prelude::*;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "takeoff")]
#[command(about = "Geometric quantity takeoff engine", version)]
pub struct Cli {
    /// Engine configuration file (JSON).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Logs go to stderr.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Calculate quantities for one geometry.
    Calc {
        /// Request JSON; reads stdin when omitted or "-".
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },
    /// Apply an edit operation to a geometry.
    Edit {
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },
    /// Evaluate or validate quantity formulas.
    Formula {
        #[command(subcommand)]
        command: FormulaCommands,
    },
    /// Roll measurements up into condition totals.
    Aggregate {
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum FormulaCommands {
    /// Evaluate a formula against a context.
    Eval {
        formula: String,
        /// FormulaContext JSON file.
        #[arg(long, value_name = "FILE")]
        context: Option<PathBuf>,
        /// Override one context input, e.g. --var qty=1000.
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
    },
    /// Check syntax and variable names without real data.
    Validate { formula: String },
    /// List the variables available to formulas.
    Vars,
}

#[derive(Debug, Deserialize)]
struct CalcInput {
    geometry: Geometry,
    scale: ScaleFactor,
    #[serde(default)]
    depth: Option<f64>,
    #[serde(default)]
    measurement_type: Option<MeasurementType>,
}

#[derive(Debug, Serialize)]
struct CalcOutput {
    kind: GeometryKind,
    result: CalculationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct EditInput {
    geometry: Geometry,
    operation: serde_json::Value,
    /// 提供比例时同时输出编辑后几何的计算结果
    #[serde(default)]
    scale: Option<ScaleFactor>,
    #[serde(default)]
    depth: Option<f64>,
}

#[derive(Debug, Serialize)]
struct EditOutput {
    operation: &'static str,
    product: EditProduct,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    calculations: Vec<CalculationResult>,
}

#[derive(Debug, Serialize)]
struct FormulaOutput<'a> {
    formula: &'a str,
    value: f64,
}

#[derive(Debug, Serialize)]
struct ValidateOutput<'a> {
    formula: &'a str,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggregateInput {
    condition: ConditionInput,
    scale: ScaleFactor,
    #[serde(default)]
    measurements: Vec<MeasurementInput>,
    /// 名称 → 公式，按汇总后的条件上下文求值
    #[serde(default)]
    formulas: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ConditionInput {
    name: String,
    measurement_type: MeasurementType,
    #[serde(default)]
    depth: Option<f64>,
    #[serde(default)]
    attributes: ConditionAttributes,
}

#[derive(Debug, Deserialize)]
struct MeasurementInput {
    geometry: Geometry,
    #[serde(default)]
    rejected: bool,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct AggregateOutput {
    condition: String,
    unit: &'static str,
    total_quantity: f64,
    measurement_count: usize,
    measurements: Vec<MeasurementSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    formulas: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct MeasurementSummary {
    kind: GeometryKind,
    quantity: f64,
    rejected: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Calc { input } => run_calc(input.as_deref()),
        Commands::Edit { input } => run_edit(&config, input.as_deref()),
        Commands::Formula { command } => run_formula(&config, command),
        Commands::Aggregate { input } => run_aggregate(&config, input.as_deref()),
    }
}

/// 错误类别 → 进程退出码
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<TakeoffError>().map(TakeoffError::kind) {
        Some(ErrorKind::InvalidInput) => 2,
        Some(ErrorKind::InvalidFormula) => 3,
        Some(ErrorKind::NotApplicable) => 4,
        Some(ErrorKind::EditRejected) => 5,
        Some(ErrorKind::NotFound) => 6,
        Some(ErrorKind::Io) => 7,
        None => 1,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn read_input<T: DeserializeOwned>(path: Option<&Path>) -> Result<T> {
    let (text, source) = match path {
        Some(p) if p != Path::new("-") => {
            let text = std::fs::read_to_string(p)
                .map_err(TakeoffError::from)
                .with_context(|| format!("failed to read {}", p.display()))?;
            (text, p.display().to_string())
        }
        _ => {
            let text = std::io::read_to_string(std::io::stdin())
                .map_err(TakeoffError::from)
                .context("failed to read stdin")?;
            (text, "stdin".to_string())
        }
    };

    serde_json::from_str(&text)
        .map_err(TakeoffError::from)
        .with_context(|| format!("failed to parse {}", source))
}

fn print_json(payload: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    println!("{json}");
    Ok(())
}

fn run_calc(input: Option<&Path>) -> Result<()> {
    let request: CalcInput = read_input(input)?;
    let result = GeometryCalculator::new().calculate(&request.geometry, request.scale, request.depth);

    let quantity = request
        .measurement_type
        .map(|t| {
            t.extract_quantity(request.geometry.kind(), &result, None)
                .unwrap_or(0.0)
        });

    print_json(&CalcOutput {
        kind: request.geometry.kind(),
        quantity,
        unit: request.measurement_type.map(|t| t.unit()),
        result,
    })
}

fn run_edit(config: &EngineConfig, input: Option<&Path>) -> Result<()> {
    let request: EditInput = read_input(input)?;
    let operation = EditOperation::from_json(&request.operation).map_err(TakeoffError::from)?;

    let editor = GeometryEditor::new(config.editor.clone());
    let product = match editor
        .apply(&request.geometry, &operation)
        .map_err(TakeoffError::from)?
    {
        EditOutcome::Applied(product) => product,
        EditOutcome::Rejected(reason) => return Err(TakeoffError::from(reason).into()),
    };

    let calculations = match request.scale {
        Some(scale) => {
            let calculator = GeometryCalculator::new();
            let pieces: Vec<&Geometry> = match &product {
                EditProduct::Single(g) => vec![g],
                EditProduct::Pair(a, b) => vec![a, b],
            };
            pieces
                .into_iter()
                .map(|g| calculator.calculate(g, scale, request.depth))
                .collect()
        }
        None => Vec::new(),
    };

    print_json(&EditOutput {
        operation: operation.name(),
        product,
        calculations,
    })
}

fn run_formula(config: &EngineConfig, command: FormulaCommands) -> Result<()> {
    let engine = FormulaEngine::new(config.formula.clone());

    match command {
        FormulaCommands::Eval {
            formula,
            context,
            vars,
        } => {
            let mut ctx: FormulaContext = match context {
                Some(path) => read_input(Some(path.as_path()))?,
                None => FormulaContext::new(),
            };
            for assignment in &vars {
                apply_var(&mut ctx, assignment)?;
            }

            let value = engine
                .evaluate(&formula, &ctx)
                .map_err(TakeoffError::from)?;
            print_json(&FormulaOutput {
                formula: &formula,
                value,
            })
        }
        FormulaCommands::Validate { formula } => {
            let error = engine.validate(&formula).err().map(|e| e.to_string());
            print_json(&ValidateOutput {
                formula: &formula,
                valid: error.is_none(),
                error,
            })
        }
        FormulaCommands::Vars => {
            let vars: &[VariableInfo] = FormulaEngine::variables();
            print_json(&vars)
        }
    }
}

/// `name=value`，只能覆盖非推导的输入变量
fn apply_var(ctx: &mut FormulaContext, assignment: &str) -> Result<()> {
    let (name, value) = assignment
        .split_once('=')
        .with_context(|| format!("expected NAME=VALUE, got '{}'", assignment))?;
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid number for '{}': '{}'", name, value))?;

    let slot = match name.trim() {
        "qty" => &mut ctx.qty,
        "depth" => &mut ctx.depth,
        "thickness" => &mut ctx.thickness,
        "perimeter" => &mut ctx.perimeter,
        "count" => &mut ctx.count,
        "height" => &mut ctx.height,
        "width" => &mut ctx.width,
        "length" => &mut ctx.length,
        other => anyhow::bail!("'{}' is not a settable formula input", other),
    };
    *slot = value;
    Ok(())
}

fn run_aggregate(config: &EngineConfig, input: Option<&Path>) -> Result<()> {
    let request: AggregateInput = read_input(input)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let output = runtime.block_on(aggregate(config, request))?;

    print_json(&output)
}

async fn aggregate(config: &EngineConfig, request: AggregateInput) -> Result<AggregateOutput> {
    let ledger = ConditionLedger::new(config.editor.clone());
    let requested = request.condition;

    let mut condition = Condition::new(requested.name, requested.measurement_type)
        .with_attributes(requested.attributes);
    condition.depth = requested.depth;
    let condition_id = ledger.create_condition(condition).await;

    let rejected: Vec<bool> = request.measurements.iter().map(|m| m.rejected).collect();
    let detections = request
        .measurements
        .into_iter()
        .map(|m| Detection {
            geometry: m.geometry,
            count: m.count,
        })
        .collect();
    let ids = ledger
        .import_detections(condition_id, detections, request.scale)
        .await?;

    for (id, _) in ids.iter().zip(&rejected).filter(|(_, r)| **r) {
        ledger.reject(condition_id, *id).await?;
    }

    let condition = ledger.condition(condition_id).await?;
    let measurements = ledger.measurements(condition_id).await?;

    let mut formulas = BTreeMap::new();
    if !request.formulas.is_empty() {
        let ctx = ledger.formula_context(condition_id).await?;
        let engine = FormulaEngine::new(config.formula.clone());
        for (name, formula) in &request.formulas {
            let value = engine
                .evaluate(formula, &ctx)
                .map_err(TakeoffError::from)
                .with_context(|| format!("formula '{}' failed", name))?;
            formulas.insert(name.clone(), value);
        }
    }

    Ok(AggregateOutput {
        unit: condition.unit(),
        total_quantity: condition.total_quantity(),
        measurement_count: condition.measurement_count(),
        condition: condition.name,
        measurements: measurements
            .iter()
            .map(|m| MeasurementSummary {
                kind: m.geometry.kind(),
                quantity: m.quantity,
                rejected: m.rejected,
            })
            .collect(),
        formulas,
    })
}
