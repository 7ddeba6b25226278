use multicarve::Carver;

/// 4x4 greyscale ramp: pixel (x, y) = 16·y + x.
fn ramp_4x4() -> Vec<u8> {
    (0..16u8).map(|i| 16 * (i / 4) + i % 4).collect()
}

fn collect_gray(carver: &mut Carver) -> Vec<u8> {
    let w = carver.width();
    let mut out = vec![0; w * carver.height()];
    carver.scan_reset();
    while let Some((x, y, px)) = carver.scan() {
        out[y * w + x] = px[0];
    }
    out
}

#[test]
fn identity_resize_is_the_identity() {
    let img = ramp_4x4();
    let mut carver = Carver::new_u8(img.clone(), 4, 4, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(4, 4).unwrap();
    assert_eq!(carver.width(), 4);
    assert_eq!(carver.height(), 4);
    assert_eq!(collect_gray(&mut carver), img);
}

#[test]
fn downscale_removes_the_minimum_energy_column() {
    // column 2 has a strictly minimal horizontal derivative in every row
    let row = [0u8, 9, 5, 9, 0];
    let img: Vec<u8> = row.iter().cloned().cycle().take(15).collect();
    let mut carver = Carver::new_u8(img, 5, 3, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(4, 3).unwrap();
    assert_eq!(carver.width(), 4);
    assert_eq!(
        collect_gray(&mut carver),
        vec![
            0, 9, 9, 0, //
            0, 9, 9, 0, //
            0, 9, 9, 0,
        ]
    );
}

#[test]
fn enlargement_inserts_averaged_columns_and_is_reversible() {
    let img: Vec<u8> = (0..12u8).map(|i| 40 * (i % 4)).collect();
    let mut carver = Carver::new_u8(img.clone(), 4, 3, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(7, 3).unwrap();
    assert_eq!(carver.width(), 7);
    assert_eq!(carver.height(), 3);

    let wide = collect_gray(&mut carver);
    // every original column value survives the enlargement
    for y in 0..3 {
        for &value in &[0u8, 40, 80, 120] {
            assert!(
                wide[y * 7..(y + 1) * 7].contains(&value),
                "row {} lost value {}: {:?}",
                y,
                value,
                &wide[y * 7..(y + 1) * 7]
            );
        }
    }
    // inserted pixels average their neighbours, so no value can exceed the
    // original range or fall between 80 and 120 other than their mean
    for &v in &wide {
        assert!(v <= 120);
    }

    // shrinking back to the start width reproduces the input exactly
    carver.resize(4, 3).unwrap();
    assert_eq!(collect_gray(&mut carver), img);
}

#[test]
fn transpose_round_trip_preserves_bytes() {
    let img: Vec<u8> = (0..6 * 4 * 3).map(|i| (i * 3 % 251) as u8).collect();
    let mut carver = Carver::new_u8(img.clone(), 6, 4, 3).unwrap();
    carver.init(1, 0.0).unwrap();

    carver.transpose().unwrap();
    assert_eq!(carver.width(), 4);
    assert_eq!(carver.height(), 6);

    carver.transpose().unwrap();
    assert_eq!(carver.width(), 6);
    assert_eq!(carver.height(), 4);

    let mut out = vec![0; img.len()];
    carver.scan_reset();
    while let Some((x, y, px)) = carver.scan() {
        out[(y * 6 + x) * 3..(y * 6 + x) * 3 + 3].copy_from_slice(px);
    }
    assert_eq!(out, img);
}

#[test]
fn attached_carver_follows_the_primary_schedule() {
    // column 2 of the primary is strictly cheapest in every row
    let row = [5u8, 9, 0, 9];
    let primary: Vec<u8> = row.iter().cloned().cycle().take(16).collect();
    let mask: Vec<u8> = (0..16).collect();

    let mut carver = Carver::new_u8(primary, 4, 4, 1).unwrap();
    let aux = Carver::new_u8(mask, 4, 4, 1).unwrap();
    carver.attach(aux).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(3, 4).unwrap();

    assert_eq!(carver.attached_count(), 1);

    // the attached layer lost exactly the pixels at the primary's carved
    // positions: column 2 of every row
    let mut survivors = Vec::new();
    carver.scan_attached_reset(0);
    while let Some((x, y, px)) = carver.scan_attached(0) {
        survivors.push((x, y, px[0]));
    }
    assert_eq!(survivors.len(), 12);
    let expected: Vec<(usize, usize, u8)> = (0..4)
        .flat_map(|y| {
            [0usize, 1, 3]
                .iter()
                .enumerate()
                .map(move |(out_x, &src_x)| (out_x, y, (y * 4 + src_x) as u8))
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(survivors, expected);
}

#[test]
fn flatten_is_idempotent_once_applied() {
    let mut carver = Carver::new_u8(ramp_4x4(), 4, 4, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(3, 4).unwrap();

    carver.flatten().unwrap();
    let once = collect_gray(&mut carver);
    assert_eq!(carver.width(), 3);

    carver.flatten().unwrap();
    let twice = collect_gray(&mut carver);
    assert_eq!(carver.width(), 3);
    assert_eq!(once, twice);
}

#[test]
fn flatten_bakes_the_current_size_as_the_new_baseline() {
    let mut carver = Carver::new_u8(ramp_4x4(), 4, 4, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(3, 4).unwrap();
    carver.flatten().unwrap();

    // enlarging relative to the new 3-wide baseline
    carver.resize(5, 4).unwrap();
    assert_eq!(carver.width(), 5);
    assert_eq!(carver.height(), 4);
}

#[test]
fn both_axes_resize() {
    let img: Vec<u8> = (0..8 * 6).map(|i| (i * 5 % 256) as u8).collect();
    let mut carver = Carver::new_u8(img, 8, 6, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(6, 4).unwrap();
    assert_eq!(carver.width(), 6);
    assert_eq!(carver.height(), 4);
    assert_eq!(collect_gray(&mut carver).len(), 24);
}

#[test]
fn vertical_first_order_is_honoured() {
    let img: Vec<u8> = (0..8 * 6).map(|i| (i * 5 % 256) as u8).collect();
    let mut carver = Carver::new_u8(img, 8, 6, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.set_resize_order(multicarve::ResizeOrder::VerticalFirst);
    carver.resize(6, 4).unwrap();
    assert_eq!(carver.width(), 6);
    assert_eq!(carver.height(), 4);
}

#[test]
fn discard_bias_steers_seams_into_the_marked_region() {
    // on a flat image every seam ties; a strong negative bias over the two
    // rightmost columns must attract both removals there. The attached tag
    // layer records which positions actually survived.
    let img = vec![128u8; 6 * 4];
    let tags: Vec<u8> = (0..24).collect();
    let mut carver = Carver::new_u8(img, 6, 4, 1).unwrap();
    carver.attach(Carver::new_u8(tags, 6, 4, 1).unwrap()).unwrap();
    carver.init(1, 0.0).unwrap();

    let mask = vec![255u8; 2 * 4];
    carver.bias_add_rgb_area(&mask, -1000.0, 1, 2, 4, 4, 0).unwrap();
    carver.resize(4, 4).unwrap();

    let mut survivors = Vec::new();
    carver.scan_attached_reset(0);
    while let Some((_, _, px)) = carver.scan_attached(0) {
        survivors.push(px[0]);
    }
    let expected: Vec<u8> = (0..4u8)
        .flat_map(|y| (0..4u8).map(move |x| y * 6 + x))
        .collect();
    assert_eq!(survivors, expected);
}

#[test]
fn rigidity_accepts_masks() {
    let img: Vec<u8> = (0..5 * 4).map(|i| (i * 7 % 256) as u8).collect();
    let mut carver = Carver::new_u8(img, 5, 4, 1).unwrap();
    carver.init(1, 2.0).unwrap();
    let mask = vec![255u8; 5 * 4];
    carver.rigmask_add_rgb(&mask, 1).unwrap();
    carver.resize(3, 4).unwrap();
    assert_eq!(carver.width(), 3);
}

#[test]
fn multi_step_enlargement_with_flatten() {
    let img: Vec<u8> = (0..3 * 2).map(|i| 50 * (i % 3) as u8).collect();
    let mut carver = Carver::new_u8(img, 3, 2, 1).unwrap();
    carver.init(1, 0.0).unwrap();
    carver.resize(5, 2).unwrap();
    assert_eq!(carver.width(), 5);
    carver.flatten().unwrap();
    carver.resize(9, 2).unwrap();
    assert_eq!(carver.width(), 9);
    assert_eq!(collect_gray(&mut carver).len(), 18);
}
