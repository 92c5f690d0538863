use crate::{channel_domain, chebyshev_domain, grid_field};
use spectre::basis::Basis;
use spectre::nalgebra::{DMatrix, DVector, DVectorView};
use spectre::pencil::PencilSet;
use spectre::problem::{BoundaryRow, LinearProblemBuilder, PencilMatrix};
use spectre::settings::{Factorization, SolverSettings};
use spectre::system::FieldSystem;
use spectre::Complex64;
use spectre_sparse::{spmv, to_dense};
use util::assert_approx_array_eq;

fn scalar(value: f64) -> DMatrix<Complex64> {
    DMatrix::from_element(1, 1, Complex64::new(value, 0.0))
}

fn c(value: f64) -> Complex64 {
    Complex64::new(value, 0.0)
}

#[test]
fn pencils_enumerate_transverse_modes() {
    let domain = channel_domain(4, 6);
    let pencils = PencilSet::new(&domain, 2).unwrap();
    assert_eq!(pencils.pencils().len(), 4);
    assert_eq!(pencils.stride(), 6);
    assert_eq!(pencils.data().shape(), &[4, 12]);

    let fourier = domain.basis(0);
    for (i, pencil) in pencils.pencils().iter().enumerate() {
        assert_eq!(pencil.index(), &[i]);
        assert_eq!(pencil.d_trans(), &[fourier.trans_diff(i).unwrap()]);
    }
    assert_eq!(pencils.pencil(1).unwrap().d_trans(), &[Complex64::new(0.0, 1.0)]);
}

#[test]
fn one_dimensional_domain_has_single_pencil() {
    let domain = chebyshev_domain(6);
    let pencils = PencilSet::new(&domain, 1).unwrap();
    assert_eq!(pencils.pencils().len(), 1);
    assert!(pencils.pencil(0).unwrap().d_trans().is_empty());
    assert!(PencilSet::new(&domain, 0).is_err());
}

#[test]
fn system_round_trip_through_interleaved_buffer() {
    let domain = channel_domain(4, 6);
    let u = grid_field(&domain, "u", |x| x[0].cos() * x[1]);
    let v = grid_field(&domain, "v", |x| x[0].sin() + x[1] * x[1]);
    let system = FieldSystem::from_fields(vec![u.clone(), v.clone()]);

    let u_coeffs = u.borrow_mut().coeff_data().unwrap();
    let v_coeffs = v.borrow_mut().coeff_data().unwrap();

    let mut pencils = PencilSet::new(&domain, 2).unwrap();
    pencils.get_system(&system).unwrap();

    // Field i occupies columns i, i + n_fields, ...
    let data = pencils.data();
    for p in 0..4 {
        for j in 0..6 {
            assert_eq!(data[[p, 2 * j]], u_coeffs[[p, j]]);
            assert_eq!(data[[p, 2 * j + 1]], v_coeffs[[p, j]]);
        }
    }

    pencils.set_system(&system).unwrap();
    assert_eq!(u.borrow().layout().index(), 0);
    assert_eq!(u.borrow().data().to_owned(), u_coeffs);
    assert_eq!(v.borrow().data().to_owned(), v_coeffs);
}

#[test]
fn pencil_data_views_one_transverse_mode() {
    let domain = channel_domain(4, 6);
    let u = grid_field(&domain, "u", |x| x[0].cos() * x[1]);
    let system = FieldSystem::from_fields(vec![u.clone()]);
    let mut pencils = PencilSet::new(&domain, 1).unwrap();
    pencils.get_system(&system).unwrap();

    let coeffs = u.borrow_mut().coeff_data().unwrap();
    let row = pencils.pencil_data(1).unwrap();
    assert_eq!(row.len(), 6);
    for j in 0..6 {
        assert_eq!(row[j], coeffs[[1, j]]);
    }

    let values = DVector::from_fn(6, |j, _| c(j as f64));
    pencils.set_pencil_data(2, &values).unwrap();
    pencils.set_system(&system).unwrap();
    let updated = u.borrow().data().to_owned();
    for j in 0..6 {
        assert_eq!(updated[[2, j]], c(j as f64));
        assert_eq!(updated[[1, j]], coeffs[[1, j]]);
    }
    assert!(pencils.set_pencil_data(0, &DVector::zeros(3)).is_err());
    assert!(pencils.pencil_data(4).is_err());
}

#[test]
fn mismatched_systems_are_rejected() {
    let domain = channel_domain(4, 6);
    let system = FieldSystem::new(&domain, &["u"]);
    let mut pencils = PencilSet::new(&domain, 2).unwrap();
    assert!(pencils.get_system(&system).is_err());

    let other = channel_domain(4, 6);
    let foreign = FieldSystem::new(&other, &["u", "v"]);
    assert!(pencils.get_system(&foreign).is_err());
    assert_eq!(foreign.names(), vec!["u".to_string(), "v".to_string()]);
    assert!(foreign.field("v").is_some());
}

#[test]
fn boundary_rows_replace_equation_rows() {
    let domain = chebyshev_domain(6);
    let n = 6;
    let problem = LinearProblemBuilder::new(1)
        .with_m0(0, |_| scalar(1.0))
        .with_l1(0, |_| scalar(1.0))
        .with_boundary(PencilMatrix::Stiffness, BoundaryRow::Left, |_| scalar(1.0))
        .with_boundary(PencilMatrix::Mass, BoundaryRow::Right, |_| scalar(2.0))
        .with_boundary_rhs(|_| DVector::from_element(1, c(3.0)))
        .build()
        .unwrap();

    let mut pencils = PencilSet::new(&domain, 1).unwrap();
    pencils.build_matrices(&problem).unwrap();
    let matrices = pencils.pencil(0).unwrap().matrices().unwrap();
    assert_eq!(matrices.bc_rows, vec![n - 2, n - 1]);
    assert_approx_array_eq!(matrices.bc_f, vec![c(3.0), c(3.0)], abstol = 0.0);

    let basis = domain.basis(0);
    let m = to_dense(&matrices.m);
    let l = to_dense(&matrices.l);
    let pre = to_dense(&basis.pre());
    let pre_diff = to_dense(&(&basis.pre() * &basis.diff()));
    for j in 0..n {
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        // Left row replaces the last equation
        assert_eq!(l[(n - 1, j)], c(sign));
        assert_eq!(m[(n - 1, j)], c(0.0));
        // Right row replaces the second to last equation
        assert_eq!(m[(n - 2, j)], c(2.0));
        assert_eq!(l[(n - 2, j)], c(0.0));
        for i in 0..n - 2 {
            assert_eq!(m[(i, j)], pre[(i, j)]);
            assert_eq!(l[(i, j)], pre_diff[(i, j)]);
        }
    }

    assert_eq!(matrices.m.pattern(), matrices.lhs.pattern());
    assert_eq!(matrices.l.pattern(), matrices.lhs.pattern());
}

#[test]
fn transverse_constants_reach_coefficient_matrices() {
    let domain = channel_domain(4, 6);
    let problem = LinearProblemBuilder::new(1)
        .with_l0(0, |d| DMatrix::from_element(1, 1, d[0] * d[0]))
        .with_boundary(PencilMatrix::Stiffness, BoundaryRow::Integral, |_| scalar(1.0))
        .build()
        .unwrap();
    let mut pencils = PencilSet::new(&domain, 1).unwrap();
    pencils.build_matrices(&problem).unwrap();

    let basis = domain.basis(1);
    let pre = to_dense(&basis.pre());
    for pencil in pencils.pencils() {
        let k2 = pencil.d_trans()[0] * pencil.d_trans()[0];
        let l = to_dense(&pencil.matrices().unwrap().l);
        assert_eq!(pencil.matrices().unwrap().bc_rows, vec![5]);
        for i in 0..5 {
            for j in 0..6 {
                assert!((l[(i, j)] - pre[(i, j)] * k2).norm() < 1e-12);
            }
        }
    }
}

#[test]
fn problem_size_must_match_field_count() {
    let domain = chebyshev_domain(6);
    let problem = LinearProblemBuilder::new(2).build().unwrap();
    let mut pencils = PencilSet::new(&domain, 1).unwrap();
    assert!(pencils.build_matrices(&problem).is_err());
    assert!(LinearProblemBuilder::new(0).build().is_err());
}

#[test]
fn first_order_boundary_value_problem() {
    // du/dz = 1 with u(-1) = 0, solved by u = z + 1 = T_0 + T_1
    let domain = chebyshev_domain(6);
    let problem = LinearProblemBuilder::new(1)
        .with_l1(0, |_| scalar(1.0))
        .with_boundary(PencilMatrix::Stiffness, BoundaryRow::Left, |_| scalar(1.0))
        .build()
        .unwrap();
    let mut pencils = PencilSet::new(&domain, 1).unwrap();
    pencils.build_matrices(&problem).unwrap();
    let pencil = pencils.pencil(0).unwrap();
    let matrices = pencil.matrices().unwrap();

    let mut f = DVector::zeros(6);
    f[0] = c(1.0);
    let mut rhs = spmv(&matrices.f_eval, DVectorView::from(&f));
    for (k, &row) in matrices.bc_rows.iter().enumerate() {
        rhs[row] = matrices.bc_f[k];
    }

    let expected = [c(1.0), c(1.0), c(0.0), c(0.0), c(0.0), c(0.0)];
    for factorization in [Factorization::PartialPivotLu, Factorization::FullPivotLu] {
        let settings = SolverSettings { factorization };
        let u = pencil.solve(c(0.0), c(1.0), &rhs, &settings).unwrap();
        assert_approx_array_eq!(u, expected, abstol = 1e-12);
    }

    assert!(pencil
        .solve(c(0.0), c(1.0), &DVector::zeros(3), &SolverSettings::default())
        .is_err());
}

#[test]
fn combine_uses_shared_pattern() {
    let domain = chebyshev_domain(6);
    let problem = LinearProblemBuilder::new(1)
        .with_m0(0, |_| scalar(1.0))
        .with_l1(0, |_| scalar(1.0))
        .with_boundary(PencilMatrix::Stiffness, BoundaryRow::Left, |_| scalar(1.0))
        .build()
        .unwrap();
    let mut pencils = PencilSet::new(&domain, 1).unwrap();
    pencils.build_matrices(&problem).unwrap();
    let pencil = pencils.pencil(0).unwrap();
    let matrices = pencil.matrices().unwrap();

    let combined = pencil.combine(c(2.0), c(-0.5)).unwrap();
    assert_eq!(combined.pattern(), matrices.lhs.pattern());
    let expected = to_dense(&matrices.m) * c(2.0) + to_dense(&matrices.l) * c(-0.5);
    assert_approx_array_eq!(to_dense(&combined), expected, abstol = 1e-14);
}

#[test]
fn unassembled_pencils_cannot_be_solved() {
    let domain = chebyshev_domain(6);
    let pencils = PencilSet::new(&domain, 1).unwrap();
    let pencil = pencils.pencil(0).unwrap();
    assert!(pencil.matrices().is_none());
    assert!(pencil.combine(c(1.0), c(1.0)).is_err());
}
