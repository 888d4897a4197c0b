//! Bayesian Network Example: Student Performance Model
//!
//! This example builds a conditional-Gaussian network over a student's
//! course and answers marginal, MPE and likelihood queries, then refits the
//! parameters from partially observed records with EM.
//!
//! Run with `RUST_LOG=cgbn_infer=debug` to see the elimination phases.

use cgbn_infer::{
    BayesNet, Cpt, EmConfig, EmLearner, Evidence, Gaussian, Gdt, GibbsConfig, GibbsSampler,
    InferenceConfig, Value, VarElim, Variable,
};
use ndarray::array;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Bayesian Network: Student Performance Model ===\n");

    // Structure: Difficulty → Grade ← Intelligence
    //                                      ↓
    //                                     SAT (continuous)
    let difficulty = Variable::enumerable("Difficulty", ["easy", "hard"])?;
    let intelligence = Variable::enumerable("Intelligence", ["low", "high"])?;
    let grade = Variable::enumerable("Grade", ["A", "B", "C"])?;
    let sat = Variable::continuous("SAT");

    let mut net = BayesNet::new();
    net.add_node(Cpt::prior(difficulty.clone(), &[0.6, 0.4])?)?;
    net.add_node(Cpt::prior(intelligence.clone(), &[0.7, 0.3])?)?;

    // Order: [Difficulty, Intelligence, Grade]
    net.add_node(Cpt::new(
        grade.clone(),
        vec![difficulty.clone(), intelligence.clone()],
        array![
            [[0.3, 0.4, 0.3], [0.9, 0.08, 0.02]],
            [[0.05, 0.25, 0.7], [0.5, 0.3, 0.2]]
        ]
        .into_dyn(),
    )?)?;
    net.add_node(Gdt::new(
        sat.clone(),
        vec![intelligence.clone()],
        vec![Gaussian::new(1000.0, 150.0 * 150.0)?, Gaussian::new(1350.0, 100.0 * 100.0)?],
    )?)?;
    println!("Network has {} nodes\n", net.len());

    let ve = VarElim::new(&net, InferenceConfig::default());

    // Prior over grades
    let prior = ve.infer(&ve.make_query(&[grade.clone()], &Evidence::new())?)?;
    println!("{}", prior);

    // Posterior intelligence after a grade and a SAT score
    let evidence = Evidence::new()
        .with_label(&grade, "A")?
        .with(&sat, Value::Continuous(1300.0))?;
    let posterior = ve.infer(&ve.make_query(&[intelligence.clone()], &evidence)?)?;
    println!("Given Grade = A and SAT = 1300:");
    println!("{}", posterior);

    // Distribution of the SAT score given a hard course and an A
    let hard_a = Evidence::new()
        .with_label(&difficulty, "hard")?
        .with_label(&grade, "A")?;
    let score = ve.infer(&ve.make_query(&[sat.clone()], &hard_a)?)?;
    if let Some(density) = score.marginal_density(&sat) {
        println!(
            "SAT | hard course, A: mean {:.1}, sd {:.1}\n",
            density.mean(),
            density.variance().sqrt()
        );
    }

    // Most probable explanation for a C grade
    let low_grade = Evidence::new().with_label(&grade, "C")?;
    let mpe = ve.infer(&ve.make_mpe(&[difficulty.clone()], &low_grade)?)?;
    if let Some(assignment) = mpe.mpe() {
        println!("Most probable explanation of Grade = C:");
        for var in [&difficulty, &intelligence] {
            let label = assignment
                .get(var)
                .and_then(|&v| var.label(v))
                .unwrap_or("?");
            println!("  {} = {}", var.name(), label);
        }
        println!();
    }

    // Probability of the evidence
    println!(
        "ln P(Grade = A, SAT = 1300) = {:.4}\n",
        ve.log_likelihood(&evidence)?
    );

    // Approximate check by Gibbs sampling
    let gibbs = GibbsSampler::new(&net, GibbsConfig::default().with_num_samples(5000))
        .run(&[intelligence.clone()], &low_grade)?;
    let exact = ve.infer(&ve.make_query(&[intelligence.clone()], &low_grade)?)?;
    println!(
        "P(Intelligence = high | Grade = C): exact {:.4}, Gibbs {:.4}\n",
        exact.probability(1)?,
        gibbs.probability(1)?
    );

    // Refit from records where Intelligence is never observed
    let records = [
        ("easy", "A", 1420.0),
        ("easy", "B", 1100.0),
        ("hard", "C", 950.0),
        ("hard", "A", 1380.0),
        ("easy", "C", 870.0),
        ("hard", "B", 1210.0),
        ("easy", "A", 1310.0),
        ("hard", "C", 1020.0),
    ];
    let data = records
        .iter()
        .map(|&(d, g, s)| {
            Evidence::new()
                .with_label(&difficulty, d)?
                .with_label(&grade, g)?
                .with(&sat, Value::Continuous(s))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut learned = net.clone();
    let report = EmLearner::new(EmConfig::default().with_max_rounds(50)).train(&mut learned, &data)?;
    println!(
        "EM: {} rounds, converged = {}, log-likelihood {:.3} -> {:.3}",
        report.rounds,
        report.converged,
        report.log_likelihoods.first().copied().unwrap_or(f64::NAN),
        report.final_log_likelihood().unwrap_or(f64::NAN)
    );

    Ok(())
}
