#![allow(unused)]

use rand::distributions::uniform::{SampleUniform, Uniform};
use rand::prelude::*;
use secure_patch::{apply_patch, generate_patch};

/// A source with one or more targets derived from it.
pub struct Sample {
    pub name: String,
    pub source: Vec<u8>,
    pub targets: Vec<Vec<u8>>,
}

/// Description of a random sample.
pub struct RandomSample {
    pub name: &'static str,
    pub size: usize,
    pub similar: &'static [f64],
}

/// Default random sample descriptions.
pub fn default_random_samples() -> Vec<RandomSample> {
    vec![
        RandomSample {
            name: "tiny",
            size: 16,
            similar: &[0.0, 0.5, 1.0],
        },
        RandomSample {
            name: "small",
            size: 1024,
            similar: &[0.0, 0.3, 0.7, 0.95, 1.0],
        },
        RandomSample {
            name: "medium",
            size: 64 * 1024,
            similar: &[0.5, 0.9, 0.99],
        },
    ]
}

/// Generate random samples from the descriptions.
pub fn random_samples(descs: &[RandomSample]) -> Vec<Sample> {
    descs
        .iter()
        .map(|desc| {
            let source = random_bytes(desc.size);
            let targets = desc.similar.iter().map(|&x| distort(&source[..], x)).collect();
            Sample {
                name: desc.name.to_string(),
                source,
                targets,
            }
        })
        .collect()
}

/// Samples of degenerate content.
pub fn degenerate_samples() -> Vec<Sample> {
    let zeros = vec![0u8; 8192];
    let mut zeros_and_one = zeros.clone();
    zeros_and_one[4000] = 1;
    let cycle: Vec<u8> = (0..8192).map(|i| (i % 3) as u8).collect();
    let shifted: Vec<u8> = (1..8000).map(|i| (i % 3) as u8).collect();

    vec![
        Sample {
            name: "empty".to_string(),
            source: Vec::new(),
            targets: vec![Vec::new(), b"hello".to_vec(), vec![0; 100]],
        },
        Sample {
            name: "to-empty".to_string(),
            source: random_bytes(300),
            targets: vec![Vec::new()],
        },
        Sample {
            name: "zeros".to_string(),
            source: zeros.clone(),
            targets: vec![zeros_and_one, vec![0; 20000], vec![0; 10], vec![1; 8192]],
        },
        Sample {
            name: "cycle".to_string(),
            source: cycle.clone(),
            targets: vec![shifted, cycle.iter().rev().cloned().collect()],
        },
    ]
}

/// Generate and apply a patch, returning the patch and the rebuilt target.
pub fn round_trip(s: &[u8], t: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let p = generate_patch(s, t).unwrap();
    let t1 = apply_patch(s, &p[..]).unwrap();
    (p, t1)
}

pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = thread_rng();
    (0..n).map(|_| rng.gen()).collect()
}

/// Generate target from source samples.
pub fn distort(source: &[u8], similar: f64) -> Vec<u8> {
    if source.is_empty() {
        return random_bytes(random_between(0, 64));
    }

    let similar = fraction(similar);
    let rate = convex_mapping(similar);

    let tsize = random_between(
        (source.len() as f64 * 0.75) as usize,
        (source.len() as f64 * 1.25) as usize,
    );
    let dmax = random_between(
        Ord::min(16, (source.len() as f64 * 0.02) as usize),
        Ord::max(32, (source.len() as f64 * 0.33) as usize),
    );
    let emax = random_between(0, (source.len() as f64 * 0.15 * (1.0 - similar)) as usize);

    let mut target = Vec::with_capacity(tsize);
    let mut rng = thread_rng();
    while target.len() < tsize {
        // similar
        let remain = tsize - target.len();
        let dsize = {
            let dhi = Ord::min(Ord::min(Ord::max(dmax, 1), remain), source.len());
            let dlo = Ord::min(16, dhi);
            random_between(dlo, dhi)
        };
        let offset = random_between(0, source.len() - dsize);
        for &x in source[offset..offset + dsize].iter() {
            if random_decide(rate) {
                target.push(x);
            } else {
                target.push(rng.gen());
            }
        }

        // extra
        let remain = tsize - target.len();
        if !random_decide(rate) {
            let esize = random_between(0, Ord::min(emax, remain));
            for _ in 0..esize {
                target.push(rng.gen());
            }
        }
    }

    target
}

fn random_decide(rate: f64) -> bool {
    random_between(0.0, 1.0) <= fraction(rate)
}

pub fn random_between<X: SampleUniform>(lo: X, hi: X) -> X {
    let mut rng = thread_rng();
    Uniform::new_inclusive(lo, hi).sample(&mut rng)
}

fn fraction(x: f64) -> f64 {
    if x.is_nan() || x.is_sign_negative() {
        0.0
    } else if x.is_infinite() || x > 1.0 {
        1.0
    } else {
        x
    }
}

fn convex_mapping(frac: f64) -> f64 {
    (1.0 - (1.0 - frac) * (1.0 - frac)).sqrt()
}
