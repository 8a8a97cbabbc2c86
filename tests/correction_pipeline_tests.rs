//! End-to-end correction scenarios: Hamming-cluster consensus rewrite,
//! split/merge accounting, and paired stream routing.

use seq_forge::correction::{HammerEngine, InputFile, PairedSinks, ReadCorrector};
use seq_forge::core::kmer::ValidKmerGenerator;
use seq_forge::core::read::{SequencedRead, VecReadStream, VecSink};
use seq_forge::utils::configuration::PipelineConfig;
use seq_forge::K;

fn config(dir: &std::path::Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.general.work_dir = dir.to_path_buf();
    cfg.general.max_threads = 2;
    cfg.count.numfiles = 4;
    cfg.count.merge_nthreads = 2;
    cfg.correct.nthreads = 2;
    cfg
}

fn input(base: &str, reads: Vec<SequencedRead>) -> InputFile {
    InputFile {
        base: base.to_string(),
        stream: Box::new(VecReadStream::new(reads)),
    }
}

fn random_read(len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| match fastrand::u8(0..4) {
            0 => b'A',
            1 => b'C',
            2 => b'G',
            _ => b'T',
        })
        .collect()
}

/// Four identical 50-bp reads plus one copy with a low-quality mismatch at
/// position 20: clustering groups the k-mers spanning the mismatch and the
/// consensus rewrite restores the reference base.
#[test]
fn mismatched_read_is_corrected_to_consensus() {
    let dir = tempfile::tempdir().unwrap();
    let engine = HammerEngine::new(config(dir.path())).unwrap();

    let reference: Vec<u8> = b"ACGTTGCATTGACCAGTCAGTGCAAGGTCAACGTTGCATGCCATTGACCA".to_vec();
    assert_eq!(reference.len(), 50);
    let mut variant = reference.clone();
    variant[20] = match variant[20] {
        b'A' => b'C',
        _ => b'A',
    };

    let mut qual = vec![35u8; 50];
    let mut reads = Vec::new();
    for i in 0..4 {
        reads.push(SequencedRead::new(
            format!("ref{i}"),
            reference.clone(),
            qual.clone(),
        ));
    }
    qual[20] = 10;
    reads.push(SequencedRead::new("variant", variant.clone(), qual));

    let mut inputs = vec![input("sample", reads)];
    let (blob, ranges, _) = engine.build_blob(&mut inputs).unwrap();
    let mut table = engine.count_kmers(&blob).unwrap();
    engine.cluster_and_expand(&blob, &mut table).unwrap();

    let corrector = ReadCorrector::new(engine.context(), &blob, &table);
    let mut good = VecSink::default();
    let mut bad = VecSink::default();
    let report = corrector
        .correct_range(ranges[0].clone(), &mut good, &mut bad)
        .unwrap();

    assert_eq!(good.reads.len(), 5);
    assert!(bad.reads.is_empty());
    for read in &good.reads {
        assert_eq!(read.seq, reference);
    }
    assert_eq!(report.changed_reads, 1);
    assert_eq!(report.changed_nucleotides, 1);
}

/// Split/merge accounting: the bucket files partition the valid k-mer
/// instances, the merged table preserves the total count, and bucket sizes
/// stay reasonably uniform under the hash.
#[test]
fn split_and_merge_preserve_kmer_accounting() {
    use seq_forge::correction::{BucketMerger, HammerContext, KmerSplitter};
    use std::io::BufRead;

    fastrand::seed(0x5ef0_12e4_1234_5678);
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.count.numfiles = 16;
    cfg.input.common_quality = Some(30);
    cfg.general.remove_temp_files = false;
    let ctx = HammerContext {
        cfg,
        work_dir: dir.path().to_path_buf(),
        iteration: 0,
    };

    let mut blob = seq_forge::Blob::new(Some(30));
    for i in 0..500 {
        blob.append_read(&format!("r{i}"), &random_read(60), &[]);
    }
    blob.append_reverse_complements();

    let files = KmerSplitter::new(&ctx).split(&blob).unwrap();
    let sizes: Vec<usize> = files
        .iter()
        .map(|p| {
            seq_forge::utils::open_reader(p, false)
                .unwrap()
                .lines()
                .count()
        })
        .collect();
    let total_instances: usize = sizes.iter().sum();

    let mut expected = 0usize;
    for id in 0..blob.total_reads() as u64 {
        let read = blob.read_at(id);
        expected += ValidKmerGenerator::new(blob.read_seq(read), &[], 30).count();
    }
    assert_eq!(total_instances, expected);

    // hash-uniform partition: no bucket dominates
    let (min, max) = (
        *sizes.iter().min().unwrap(),
        *sizes.iter().max().unwrap(),
    );
    assert!(min > 0, "empty bucket under a uniform hash");
    assert!(
        (max as f64) < 1.5 * min as f64,
        "bucket skew: min {min}, max {max}"
    );

    let table = BucketMerger::new(&ctx).merge(&blob, &files).unwrap();
    assert_eq!(table.total_occurrences(), expected as u64);
    // kmernos is strictly sorted, so entries are distinct
    for w in table.kmernos.windows(2) {
        assert!(blob.kmer_bytes(w[0]) < blob.kmer_bytes(w[1]));
    }
}

/// Paired correction where the left mate is solid and the right mate is
/// junk: left goes to the unpaired stream, right to its bad stream, and the
/// paired outputs stay empty.
#[test]
fn paired_correction_routes_half_good_pairs_to_unpaired() {
    let dir = tempfile::tempdir().unwrap();
    let engine = HammerEngine::new(config(dir.path())).unwrap();

    let strong: Vec<u8> = b"ACGTTGCATTGACCAGTCAGTGCAAGGTCAACGTTGCATGCCATTGACCA".to_vec();
    fastrand::seed(42);
    let left_reads: Vec<SequencedRead> = (0..5)
        .map(|i| SequencedRead::new(format!("l{i}"), strong.clone(), vec![35; 50]))
        .collect();
    // each right mate is a distinct random read: every k-mer a weak singleton
    let right_reads: Vec<SequencedRead> = (0..5)
        .map(|i| SequencedRead::new(format!("r{i}"), random_read(50), vec![35; 50]))
        .collect();

    let mut inputs = vec![input("left", left_reads), input("right", right_reads)];
    let (blob, ranges, _) = engine.build_blob(&mut inputs).unwrap();
    let mut table = engine.count_kmers(&blob).unwrap();
    engine.cluster_and_expand(&blob, &mut table).unwrap();

    let corrector = ReadCorrector::new(engine.context(), &blob, &table);
    let (mut cl, mut cr, mut bl, mut br, mut un) = (
        VecSink::default(),
        VecSink::default(),
        VecSink::default(),
        VecSink::default(),
        VecSink::default(),
    );
    let mut sinks = PairedSinks {
        cor_left: &mut cl,
        cor_right: &mut cr,
        bad_left: &mut bl,
        bad_right: &mut br,
        unpaired: &mut un,
    };
    corrector
        .correct_paired(ranges[0].clone(), ranges[1].clone(), &mut sinks)
        .unwrap();

    assert_eq!(un.reads.len(), 5, "good left mates go unpaired");
    assert_eq!(br.reads.len(), 5, "junk right mates go to bad");
    assert!(cl.reads.is_empty());
    assert!(cr.reads.is_empty());
    assert!(bl.reads.is_empty());
}

/// A read of exactly K bases contributes one k-mer and is either corrected
/// or classified as bad depending on that k-mer's solidity.
#[test]
fn read_of_length_k_is_classified_by_its_single_kmer() {
    let dir = tempfile::tempdir().unwrap();
    let engine = HammerEngine::new(config(dir.path())).unwrap();

    let kmer: Vec<u8> = b"ACGTTGCATTGACCAGTCAGT".to_vec();
    assert_eq!(kmer.len(), K);
    // three copies: count passes the threshold, the k-mer is solid
    let reads: Vec<SequencedRead> = (0..3)
        .map(|i| SequencedRead::new(format!("k{i}"), kmer.clone(), vec![35; K]))
        .collect();
    let mut inputs = vec![input("solid", reads)];
    let (blob, ranges, _) = engine.build_blob(&mut inputs).unwrap();
    let mut table = engine.count_kmers(&blob).unwrap();
    engine.cluster_and_expand(&blob, &mut table).unwrap();
    let corrector = ReadCorrector::new(engine.context(), &blob, &table);
    let mut good = VecSink::default();
    let mut bad = VecSink::default();
    corrector
        .correct_range(ranges[0].clone(), &mut good, &mut bad)
        .unwrap();
    assert_eq!(good.reads.len(), 3);
    assert!(bad.reads.is_empty());

    // a lone weak read: its only k-mer is an untrusted singleton
    let dir2 = tempfile::tempdir().unwrap();
    let engine2 = HammerEngine::new(config(dir2.path())).unwrap();
    let mut inputs2 = vec![input(
        "weak",
        vec![SequencedRead::new("w", b"TTGACCAGTCAGTGCAAGGTC".to_vec(), vec![12; K])],
    )];
    let (blob2, ranges2, _) = engine2.build_blob(&mut inputs2).unwrap();
    let mut table2 = engine2.count_kmers(&blob2).unwrap();
    engine2.cluster_and_expand(&blob2, &mut table2).unwrap();
    let corrector2 = ReadCorrector::new(engine2.context(), &blob2, &table2);
    let mut good2 = VecSink::default();
    let mut bad2 = VecSink::default();
    corrector2
        .correct_range(ranges2[0].clone(), &mut good2, &mut bad2)
        .unwrap();
    assert!(good2.reads.is_empty());
    assert_eq!(bad2.reads.len(), 1);
}

/// The full engine entry point writes the conventional FASTQ outputs.
#[test]
fn run_iteration_writes_fastq_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = HammerEngine::new(config(dir.path())).unwrap();
    let strong: Vec<u8> = b"ACGTTGCATTGACCAGTCAGTGCAAGGTCAACGTTGCATGCCATTGACCA".to_vec();
    let reads: Vec<SequencedRead> = (0..4)
        .map(|i| SequencedRead::new(format!("s{i}"), strong.clone(), vec![35; 50]))
        .collect();
    let mut inputs = vec![input("sample", reads)];
    let report = engine.run_iteration(&mut inputs).unwrap();
    assert_eq!(report.reads, 4);
    assert_eq!(report.correction.good_reads, 4);

    let cor = dir.path().join("sample.00.cor.fastq");
    let bad = dir.path().join("sample.00.bad.fastq");
    assert!(cor.exists());
    assert!(bad.exists());
    let content = std::fs::read_to_string(&cor).unwrap();
    assert_eq!(content.matches('@').count(), 4);
}
