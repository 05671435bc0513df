use csv_core::{ReadFieldResult, ReaderBuilder};
use lasso::{Rodeo, Spur};
use stagedtrees::search::*;
use stagedtrees::{lr_test, Records, StagedTree};
use std::error::Error;
use std::io;
use std::str;
use tracing_subscriber::EnvFilter;

/// Reads tab-separated records. The first line names the variables. Every later line has one
/// field per variable, optionally preceded by a count for the whole line.
fn load_data<I: io::Read>(mut input: I) -> io::Result<Records> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 1024];
    let mut fieldlen = 0;
    let mut record: Vec<Spur> = Vec::new();
    let mut header: Option<Vec<Spur>> = None;
    let mut rows: Vec<(Vec<Spur>, f64)> = Vec::new();
    let mut rodeo = Rodeo::new();
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    let invalid = |e: String| io::Error::new(io::ErrorKind::InvalidData, e);

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(invalid(format!("field too long on line {}", tsv.line())));
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen])
                        .map_err(|e| invalid(e.to_string()))?;
                    fieldlen = 0;
                    record.push(rodeo.get_or_intern(field));

                    if record_end {
                        match header.as_ref().map(Vec::len) {
                            None => header = Some(std::mem::take(&mut record)),
                            Some(width) => {
                                let count = if record.len() == width + 1 {
                                    let count = rodeo.resolve(&record.remove(0));
                                    count.parse().map_err(|_| {
                                        invalid(format!(
                                            "bad count `{}` on line {}",
                                            count,
                                            tsv.line()
                                        ))
                                    })?
                                } else {
                                    1.0
                                };
                                rows.push((std::mem::take(&mut record), count));
                            }
                        }
                    }
                }
                ReadFieldResult::End => {
                    let header = header.unwrap_or_default();
                    let mut records = Records::new(header.iter().map(|name| rodeo.resolve(name)));
                    for (row, count) in rows {
                        records
                            .push_weighted(row.iter().map(|value| rodeo.resolve(value)), count)
                            .map_err(|e| invalid(e.to_string()))?;
                    }
                    return Ok(records);
                }
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let algorithm = args.next().unwrap_or_else(|| "bhc".to_string());
    let mut options = SearchOptions::default();
    if let Some(max_iter) = args.next() {
        options = options.with_max_iter(max_iter.parse()?);
    }

    let records = load_data(io::stdin().lock())?;
    let mut saturated = StagedTree::full(records.tree()?);
    saturated.fit(&records, 0.0)?;

    println!("variables: {:?}", records.header());
    println!("  sample size: {}", saturated.sample_size()?);
    println!("  saturated log-likelihood: {:.5}", saturated.log_likelihood()?);
    println!("  saturated degrees of freedom: {}", saturated.degrees_of_freedom());

    println!();
    println!("{} (max_iter = {}):", algorithm, options.max_iter);
    let mut report = |iteration: usize, action: &Action, score: f64| {
        println!("  {:>4}  {:<56} {:.4}", iteration, action.to_string(), score);
    };
    let start = saturated.clone();
    let outcome = match algorithm.as_str() {
        "hc" => hill_climb(start, &options, &mut report)?,
        "bhc" => backward_hill_climb(start, &options, &mut report)?,
        "fbhc" => fast_backward_hill_climb(start, &options, &mut report)?,
        "bhcr" => random_backward_hill_climb(start, &options, &mut report)?,
        "hclust" => hclust(start, &options, &mut report)?,
        "kmeans" => kmeans(start, &options, &mut report)?,
        "bj" => binary_join(start, &options, &mut report)?,
        other => return Err(format!("unknown algorithm `{}`", other).into()),
    };
    let mut model = outcome.model;
    model.relabel_stages();

    println!();
    println!("result ({:?} after {} changes):", outcome.state, outcome.trajectory.len() - 1);
    let tree = model.tree().clone();
    for variable in 0..tree.len() {
        println!(
            "  {}: {}",
            tree.name(variable),
            model.stages().expanded(&tree, variable).join(" ")
        );
    }
    println!("  log-likelihood: {:.5}", model.log_likelihood()?);
    println!("  degrees of freedom: {}", model.degrees_of_freedom());
    println!("  Akaike Information Criterion: {:.2}", model.aic()?);
    println!("  Bayesian Information Criterion: {:.2}", model.bic()?);
    println!(
        "  error probability in rejecting equivalence to saturation: {:.2}%",
        lr_test(&model, &saturated)? * 100.0
    );

    Ok(())
}
