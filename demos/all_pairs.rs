use hll_union::{CpuEngine, Engine, GpuEngine, HostDevice, Precision, SketchBatch, UnionEstimator};

/// Build a sketch of precision 4 from pre-hashed items: the low 4 bits pick the
/// register, the remaining bits give the rank.
fn sketch(items: &[u64]) -> Vec<u8> {
    let mut registers = vec![0u8; 16];
    for item in items {
        let idx = (item & 0xf) as usize;
        let rank = ((item >> 4) as u8).clamp(1, 60);
        registers[idx] = registers[idx].max(rank);
    }
    registers
}

fn main() -> hll_union::Result<()> {
    let precision = Precision::new(4)?;
    let sketches = [
        sketch(&[0x11, 0x22, 0x33]),
        sketch(&[0x33, 0x44, 0x15]),
        sketch(&[0x16, 0x27, 0x38, 0x49]),
    ];
    let batch = SketchBatch::new(precision, sketches.iter().map(Vec::as_slice))?;

    let engines: [Engine; 2] = [
        CpuEngine::new().into(),
        GpuEngine::new(HostDevice::new()).into(),
    ];
    for engine in &engines {
        let sizes = engine.estimate_sketches(&batch)?;
        println!("{}: sketch estimates = {:?}", engine.name(), sizes);
        let unions = engine.estimate_unions(&batch)?;
        for ((i, j), estimate) in unions.iter() {
            println!("{}: |S{} ∪ S{}| ≈ {:.2}", engine.name(), i, j, estimate);
        }
        let jaccard = unions.jaccard(&sizes);
        println!("{}: jaccard = {:?}", engine.name(), jaccard.as_slice());
    }
    Ok(())
}
