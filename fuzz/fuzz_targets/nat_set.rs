#![no_main]
use libfuzzer_sys::fuzz_target;

use flowcolor::nat_set::NatSet;

// Naturals at or above DOMAIN are all in or all out of a model set.
const DOMAIN: usize = 200;

#[derive(Clone)]
struct Model {
    bits: Vec<bool>,
    tail: bool,
}

impl Model {
    fn contains(&self, n: usize) -> bool {
        if n < DOMAIN {
            self.bits[n]
        } else {
            self.tail
        }
    }

    fn merge(&mut self, other: &Model, f: impl Fn(bool, bool) -> bool) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a = f(*a, *b);
        }
        self.tail = f(self.tail, other.tail);
    }
}

fn check(set: &NatSet, model: &Model) {
    for n in 0..DOMAIN + 8 {
        assert_eq!(set.contains(n), model.contains(n), "membership of {}", n);
    }
    assert_eq!(set.is_finite(), !model.tail);
    if !model.tail {
        assert_eq!(set.card(), Some(model.bits.iter().filter(|b| **b).count()));
    }
}

fuzz_target!(|data: &[u8]| {
    let mut sets = vec![NatSet::empty(), NatSet::empty()];
    let mut models = vec![
        Model { bits: vec![false; DOMAIN], tail: false },
        Model { bits: vec![false; DOMAIN], tail: false },
    ];

    for chunk in data.chunks(2) {
        let (op, arg) = (chunk[0], *chunk.get(1).unwrap_or(&0) as usize % DOMAIN);
        let (i, j) = ((op & 1) as usize, ((op >> 1) & 1) as usize);
        match (op >> 2) % 7 {
            0 => {
                sets[i].insert(arg);
                models[i].bits[arg] = true;
            }
            1 => {
                sets[i].remove(arg);
                models[i].bits[arg] = false;
            }
            2 => {
                sets[i].complement();
                let same = models[i].clone();
                models[i].merge(&same, |a, _| !a);
            }
            3 => {
                let other = sets[j].clone();
                sets[i] += &other;
                let other = models[j].clone();
                models[i].merge(&other, |a, b| a || b);
            }
            4 => {
                let other = sets[j].clone();
                sets[i] *= &other;
                let other = models[j].clone();
                models[i].merge(&other, |a, b| a && b);
            }
            5 => {
                let other = sets[j].clone();
                sets[i] -= &other;
                let other = models[j].clone();
                models[i].merge(&other, |a, b| a && !b);
            }
            _ => {
                sets[i] = NatSet::range(arg);
                models[i] = Model { bits: (0..DOMAIN).map(|n| n < arg).collect(), tail: false };
            }
        }
        check(&sets[i], &models[i]);
    }
});
