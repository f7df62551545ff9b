//! End-to-end single-pinhole runs on a synthetic arc frame: 50 lines over
//! orders 1–3 drawn from a known dispersion solution, centroids jittered by
//! 0.05 px and two lines displaced by 10 px.

mod synthetic;

use echelle_dispmap::{
    fit_single_pinhole, load_coefficient_table, Basis, DispersionFitConfig, DispersionMap,
    LineCatalogue, LineQuality, PolynomialCoefficientSet, PredictedLine,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use synthetic::{render_frame, surface, Profile};

const OUTLIERS: [(usize, (f64, f64)); 2] = [(20, (8.0, 6.0)), (42, (-8.0, -6.0))];

struct Scenario {
    frame: echelle_dispmap::CalibrationFrame,
    catalogue: LineCatalogue,
    truth: PolynomialCoefficientSet,
    config: DispersionFitConfig,
}

fn truth() -> PolynomialCoefficientSet {
    let basis = Basis::Single {
        order_deg: 2,
        wavelength_deg: 3,
    };
    // X = -550 + 600·λ + 10·m + 4·m·λ²
    // Y = 60 + 15·λ + 120·m + 2·m²·λ
    surface(
        basis,
        &[((0, 0, 0), -550.0), ((0, 1, 0), 600.0), ((1, 0, 0), 10.0), ((1, 2, 0), 4.0)],
        &[((0, 0, 0), 60.0), ((0, 1, 0), 15.0), ((1, 0, 0), 120.0), ((2, 1, 0), 2.0)],
    )
}

fn scenario(seed: u64) -> Scenario {
    let truth = truth();
    let mut rng = StdRng::seed_from_u64(seed);
    let jitter = Normal::new(0.0, 0.05).unwrap();
    let prediction_error = Normal::new(0.0, 0.3).unwrap();

    let mut lines = Vec::new();
    let mut centres = Vec::new();
    for (order, count) in [(1u32, 17usize), (2, 17), (3, 16)] {
        for i in 0..count {
            let wavelength = 1.0 + (i as f64 + 0.5) / count as f64;
            let (x, y) = truth.evaluate(order, wavelength, None);
            lines.push(PredictedLine {
                order,
                wavelength,
                slit_index: None,
                slit_position: None,
                predicted_x: x + prediction_error.sample(&mut rng),
                predicted_y: y + prediction_error.sample(&mut rng),
            });
            centres.push((x + jitter.sample(&mut rng), y + jitter.sample(&mut rng)));
        }
    }
    assert_eq!(lines.len(), 50);
    for (k, (dx, dy)) in OUTLIERS {
        centres[k].0 += dx;
        centres[k].1 += dy;
    }

    let profile = Profile {
        amplitude: 2000.0,
        sigma: 1.5,
    };
    let frame = render_frame(800, 560, &centres, profile, 100.0, 2.0, &mut rng);
    let config = DispersionFitConfig {
        order_deg: 2,
        wavelength_deg: 3,
        slit_deg: 0,
        // Wide enough to catch the displaced lines.
        win_x: 12,
        win_y: 9,
        sigma_clip: 3.0,
        max_iterations: 10,
        ..Default::default()
    };
    Scenario {
        frame,
        catalogue: LineCatalogue::new(lines).unwrap(),
        truth,
        config,
    }
}

#[test]
fn test_single_pinhole_rejects_exactly_the_outliers() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let s = scenario(42);
    let solution = fit_single_pinhole(&s.frame, &s.catalogue, &s.config).expect("fit succeeds");

    assert!(solution.is_converged());
    assert!(solution.iterations() <= 5, "{} iterations", solution.iterations());
    assert_eq!(solution.qc.lines_detected, 50);
    assert!((solution.qc.detected_fraction - 1.0).abs() < 1e-12);

    let rejected: Vec<usize> = solution
        .lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.quality == LineQuality::Rejected)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(rejected, vec![OUTLIERS[0].0, OUTLIERS[1].0]);

    let (rms_x, rms_y) = solution.final_rms();
    println!(
        "Converged in {} iterations, RMS x={:.4} y={:.4} px",
        solution.iterations(),
        rms_x,
        rms_y
    );
    assert!(rms_x < 0.1 && rms_y < 0.1);
    assert_eq!(solution.map.lines_used, 48);
    assert_eq!(solution.map.lines_rejected, 2);
    assert!(solution.map.converged);
    assert!(solution.shift.is_none());

    // The first cycle saw every line and clipped both outliers at once.
    assert_eq!(solution.history[0].active_lines, 50);
    assert_eq!(solution.history[0].rejected_this_cycle, 2);
    for pair in solution.history.windows(2) {
        assert!(pair[1].active_lines <= pair[0].active_lines);
    }

    // The solution reproduces the true surfaces across the catalogue.
    for line in s.catalogue.iter() {
        let (x, y) = solution.coefficients.evaluate(line.order, line.wavelength, None);
        let (tx, ty) = s.truth.evaluate(line.order, line.wavelength, None);
        assert!((x - tx).abs() < 0.15, "x {x} vs {tx}");
        assert!((y - ty).abs() < 0.15, "y {y} vs {ty}");
    }
    assert!(solution.qc.residual_xy.max < 3.0 * rms_x.hypot(rms_y));
}

#[test]
fn test_single_pinhole_map_persists() {
    let s = scenario(7);
    let solution = fit_single_pinhole(&s.frame, &s.catalogue, &s.config).expect("fit succeeds");

    let dir = std::env::temp_dir().join(format!("dispmap-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let csv = dir.join("disp_map.csv");
    solution.map.save_csv(&csv).unwrap();
    let prior = load_coefficient_table(&csv).unwrap();
    assert_eq!(prior, solution.coefficients);

    let json = dir.join("disp_map.json");
    solution.map.save_json(&json).unwrap();
    assert_eq!(DispersionMap::load_json(&json).unwrap(), solution.map);

    let bin = dir.join("disp_map.rkyv");
    solution.map.save_to_file(&bin).unwrap();
    let loaded = DispersionMap::load_from_file(&bin).unwrap();
    assert_eq!(loaded.coefficient_set().unwrap(), solution.coefficients);

    // Every catalogue line maps onto the detector.
    let positions = loaded
        .pixel_positions(s.catalogue.iter().map(|l| (l.order, l.wavelength, None)))
        .unwrap();
    assert_eq!(positions.len(), s.catalogue.len());
    for p in &positions {
        let (tx, ty) = s.truth.evaluate(p.order, p.wavelength, None);
        assert!((p.x - tx).abs() < 0.15 && (p.y - ty).abs() < 0.15);
    }

    std::fs::remove_dir_all(&dir).unwrap();
}
