//! Diagnostic dumps for particles that failed to converge.

use std::fmt::Write;

use sphex_core::Particle;

/// One-line dump of everything the solver knows about `particle`.
pub fn describe(particle: &Particle, index: usize) -> String {
    let mut s = String::new();
    let b = &particle.bracket;
    // Writing to a String cannot fail.
    let _ = write!(
        s,
        "particle id={} index={} kind={:?} pos=[{:.6e}, {:.6e}, {:.6e}] vel=[{:.6e}, {:.6e}, {:.6e}] \
         mass={:.6e} radius={:.6e} neighbors={:.3} left={} right={} pin={:?} activity={:?}",
        particle.id,
        index,
        particle.kind,
        particle.pos[0],
        particle.pos[1],
        particle.pos[2],
        particle.vel[0],
        particle.vel[1],
        particle.vel[2],
        particle.mass,
        particle.radius,
        particle.neighbors,
        fmt_bound(b.left),
        fmt_bound(b.right),
        b.pin,
        particle.activity,
    );
    s
}

fn fmt_bound(bound: Option<f64>) -> String {
    bound.map_or_else(|| "unset".to_owned(), |v| format!("{v:.6e}"))
}
