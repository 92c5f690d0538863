use crate::{channel_domain, grid_field};
use spectre::field::Field;
use spectre::layout::TransformStep;

#[test]
fn serial_chain_transforms_axes_from_last_to_first() {
    let domain = crate::chebyshev_domain(6);
    let distributor = domain.distributor();
    assert_eq!(distributor.layouts().len(), 2);
    assert_eq!(distributor.paths(), &[TransformStep::Transform { axis: 0 }]);
    assert_eq!(distributor.coeff_layout().grid_space(), &[false]);
    assert_eq!(distributor.grid_layout().grid_space(), &[true]);
}

#[test]
fn distributed_chain_transposes_before_transforming_distributed_axis() {
    let domain = channel_domain(4, 6);
    let distributor = domain.distributor();
    assert_eq!(
        distributor.paths(),
        &[
            TransformStep::Transform { axis: 1 },
            TransformStep::Transpose { mesh_dim: 0, axis: 0 },
            TransformStep::Transform { axis: 0 },
        ]
    );
    assert_eq!(distributor.layouts().len(), 4);

    let coeff = distributor.coeff_layout();
    assert_eq!(coeff.distribution(), &[Some(0), None]);
    assert!(coeff.is_local(1));
    assert!(!coeff.is_local(0));

    let grid = distributor.grid_layout();
    assert_eq!(grid.distribution(), &[None, Some(0)]);
    assert!(grid.is_local(0));
}

#[test]
fn layout_indices_follow_chain_order() {
    let domain = channel_domain(4, 6);
    for (i, layout) in domain.distributor().layouts().iter().enumerate() {
        assert_eq!(layout.index(), i);
    }
}

#[test]
fn constant_axes_have_unit_extent() {
    let domain = channel_domain(4, 6);
    let field = Field::constant(&domain, "c");
    assert_eq!(field.local_shape(), &[1, 1]);
    assert_eq!(field.global_shape(), vec![1, 1]);
}

#[test]
fn require_layout_steps_through_every_intermediate_layout() {
    let domain = channel_domain(4, 6);
    let u = grid_field(&domain, "u", |x| x[0].sin() * x[1]);
    let mut u = u.borrow_mut();
    let grid = domain.distributor().grid_layout().index();
    assert_eq!(u.layout().index(), grid);

    let before = u.transform_count();
    u.require_layout(0).unwrap();
    assert_eq!(u.layout().index(), 0);
    assert_eq!(u.transform_count(), before + 3);
}

#[test]
fn require_layout_is_idempotent() {
    let domain = channel_domain(4, 6);
    let u = grid_field(&domain, "u", |x| x[0].cos() + x[1]);
    let mut u = u.borrow_mut();

    u.require_coeff_space(None).unwrap();
    let count = u.transform_count();
    let version = u.version();
    u.require_coeff_space(None).unwrap();
    u.require_layout(0).unwrap();
    assert_eq!(u.transform_count(), count);
    assert_eq!(u.version(), version);

    u.require_grid_space(None).unwrap();
    let count = u.transform_count();
    u.require_grid_space(None).unwrap();
    u.require_grid_space(Some(0)).unwrap();
    assert_eq!(u.transform_count(), count);
}

#[test]
fn require_coeff_space_along_first_axis_needs_only_one_step() {
    let domain = channel_domain(4, 6);
    let u = grid_field(&domain, "u", |x| x[0].cos() * x[1]);
    let mut u = u.borrow_mut();
    let count = u.transform_count();
    u.require_coeff_space(Some(0)).unwrap();
    assert_eq!(u.transform_count(), count + 1);
    assert_eq!(u.layout().grid_space(), &[false, true]);
}

#[test]
fn layout_index_outside_chain_is_rejected() {
    let domain = channel_domain(4, 6);
    let mut u = Field::new(&domain, "u");
    assert!(u.require_layout(4).is_err());
    assert!(u.towards_coeff_space().is_err());
}
