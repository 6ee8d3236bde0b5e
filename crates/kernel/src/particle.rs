//! Rank-local particle storage using struct-of-arrays layout for GPU-readiness.

/// Struct-of-arrays particle storage.
///
/// All arrays are parallel: index `i` across every array refers to the same particle.
/// Separate x/y/z arrays map one-to-one onto GPU storage buffers, so the
/// accelerator engine can upload positions without repacking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleArrays {
    // ---- Positions ----
    /// X positions
    pub x: Vec<f32>,
    /// Y positions
    pub y: Vec<f32>,
    /// Z positions
    pub z: Vec<f32>,

    /// Global particle tag, stable across migrations between ranks.
    pub tag: Vec<u64>,
}

impl ParticleArrays {
    /// Create an empty particle collection with no particles allocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty collection with room for `n` particles.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            tag: Vec::with_capacity(n),
        }
    }

    /// Return the number of particles currently stored.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Return `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Append a single particle.
    pub fn push_particle(&mut self, px: f32, py: f32, pz: f32, tag: u64) {
        self.x.push(px);
        self.y.push(py);
        self.z.push(pz);
        self.tag.push(tag);
    }

    /// Position of particle `i`.
    #[inline]
    pub fn position(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    /// Append all particles of `other`.
    pub fn extend_from(&mut self, other: &ParticleArrays) {
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
        self.tag.extend_from_slice(&other.tag);
    }

    /// Split the collection into `n` buckets using `owner(i)` to pick the
    /// bucket of particle `i`. Relative order inside each bucket is preserved.
    pub fn partition_by<F>(&self, n: usize, mut owner: F) -> Vec<ParticleArrays>
    where
        F: FnMut(usize) -> usize,
    {
        let mut buckets: Vec<ParticleArrays> = (0..n).map(|_| ParticleArrays::new()).collect();
        for i in 0..self.len() {
            let b = owner(i);
            buckets[b].push_particle(self.x[i], self.y[i], self.z[i], self.tag[i]);
        }
        buckets
    }
}
