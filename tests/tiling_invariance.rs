use bsconv::reference::random_tensor;
use bsconv::{BitSerialConv, ConvConfig, ConvShape, PrecisionPair};
use pretty_assertions::assert_eq;

fn inputs(shape: &ConvShape, prec: PrecisionPair, seed: u64) -> (Vec<u8>, Vec<u8>) {
    (
        random_tensor(shape.activation_len(), prec.activation, seed),
        random_tensor(shape.filter_len(), prec.weight, seed + 1),
    )
}

fn run_u8(config: ConvConfig, shape: &ConvShape, act: &[u8], filt: &[u8], prec: PrecisionPair) -> Vec<u8> {
    let engine = BitSerialConv::<u8>::new(config).unwrap();
    let mut out = vec![0u8; shape.output_len()];
    engine.run(&mut out, act, filt, shape, prec).unwrap();
    out
}

#[test]
fn tile_size_does_not_change_output() {
    let shape = ConvShape::new(9, 37, 16, 2);
    for prec in PrecisionPair::all() {
        let (act, filt) = inputs(&shape, prec, 21);
        let one_tile = run_u8(ConvConfig::default(), &shape, &act, &filt, prec);
        // 35 output columns: 3 lanes leave a 2-lane remainder, 5 lanes divide evenly, 1 lane is the extreme.
        for tile_size in [3, 5, 7, 12, 36, 37] {
            let cfg = ConvConfig { tile_size, ..Default::default() };
            assert_eq!(run_u8(cfg, &shape, &act, &filt, prec), one_tile, "{} tile_size={}", prec, tile_size);
        }
    }
}

#[test]
fn row_block_does_not_change_output() {
    let shape = ConvShape::new(23, 10, 8, 2);
    for prec in PrecisionPair::all() {
        let (act, filt) = inputs(&shape, prec, 33);
        let base = run_u8(ConvConfig::default(), &shape, &act, &filt, prec);
        for row_block in [1, 2, 3, 4, 7, 21, 64] {
            let cfg = ConvConfig { row_block, tile_size: 6, ..Default::default() };
            assert_eq!(run_u8(cfg, &shape, &act, &filt, prec), base, "{} row_block={}", prec, row_block);
        }
    }
}

#[test]
fn channel_group_width_does_not_change_output() {
    // 64 channels: eight groups of 8, four of 16, two of 32, one of 64.
    let shape = ConvShape::new(7, 9, 64, 2);
    for prec in PrecisionPair::all() {
        let (act, filt) = inputs(&shape, prec, 44);
        let mut by8 = vec![0u8; shape.output_len()];
        let mut by16 = vec![0u8; shape.output_len()];
        let mut by32 = vec![0u8; shape.output_len()];
        let mut by64 = vec![0u8; shape.output_len()];
        BitSerialConv::<u8>::with_defaults().run(&mut by8, &act, &filt, &shape, prec).unwrap();
        BitSerialConv::<u16>::with_defaults().run(&mut by16, &act, &filt, &shape, prec).unwrap();
        BitSerialConv::<u32>::with_defaults().run(&mut by32, &act, &filt, &shape, prec).unwrap();
        BitSerialConv::<u64>::with_defaults().run(&mut by64, &act, &filt, &shape, prec).unwrap();
        assert_eq!(by16, by8, "{}", prec);
        assert_eq!(by32, by8, "{}", prec);
        assert_eq!(by64, by8, "{}", prec);
    }
}

#[test]
fn sixteen_channels_as_one_group_or_two() {
    let shape = ConvShape::new(6, 6, 16, 1);
    let prec = PrecisionPair::from_bits(2, 2).unwrap();
    let (act, filt) = inputs(&shape, prec, 5);
    let mut two_groups = vec![0u8; shape.output_len()];
    let mut one_group = vec![0u8; shape.output_len()];
    let narrow = BitSerialConv::<u8>::with_defaults();
    let wide = BitSerialConv::<u16>::with_defaults();
    assert_eq!((narrow.group_width(), wide.group_width()), (8, 16));
    narrow.run(&mut two_groups, &act, &filt, &shape, prec).unwrap();
    wide.run(&mut one_group, &act, &filt, &shape, prec).unwrap();
    assert_eq!(one_group, two_groups);
}

#[test]
fn parallel_output_channels_match_sequential() {
    let shape = ConvShape::new(12, 19, 24, 7);
    for prec in PrecisionPair::all() {
        let (act, filt) = inputs(&shape, prec, 70);
        let seq = run_u8(ConvConfig { tile_size: 8, ..Default::default() }, &shape, &act, &filt, prec);
        let par = run_u8(ConvConfig { tile_size: 8, parallel: true, ..Default::default() }, &shape, &act, &filt, prec);
        assert_eq!(par, seq, "{}", prec);
    }
}

#[test]
fn scratch_is_reusable_across_calls_and_configs() {
    let shape = ConvShape::new(10, 10, 8, 2);
    let prec = PrecisionPair::from_bits(1, 2).unwrap();
    let (act, filt) = inputs(&shape, prec, 90);
    let expected = run_u8(ConvConfig::default(), &shape, &act, &filt, prec);

    let engine = BitSerialConv::<u8>::new(ConvConfig { tile_size: 4, row_block: 3, ..Default::default() }).unwrap();
    let mut scratch = BitSerialConv::<u8>::with_defaults().scratch();
    for _ in 0..3 {
        let mut out = vec![0u8; shape.output_len()];
        engine.run_with_scratch(&mut scratch, &mut out, &act, &filt, &shape, prec).unwrap();
        assert_eq!(out, expected);
    }
}
