use core::fmt;

use crate::{
    BlockidError,
    probe::{BlockType, BlockidMagic, Probe, UsageType},
};

/// Family predicate run once per candidate magic location.
///
/// Returns `Ok(true)` when the family claims the device, in which case it
/// must have pushed its metadata onto the probe. `Ok(false)` is a plain
/// non-match; errors are I/O failures and abort the chain.
pub type ProbeFn = fn(&mut Probe, BlockidMagic) -> Result<bool, BlockidError>;

/// One filesystem family test.
#[derive(Copy, Clone)]
pub struct Prober {
    pub name: &'static str,
    pub btype: BlockType,
    pub usage: UsageType,
    /// Smallest region, in bytes, the family can live in.
    pub minsz: Option<u64>,
    pub probe_fn: ProbeFn,
    pub magics: &'static [BlockidMagic],
}

impl fmt::Debug for Prober {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prober")
            .field("name", &self.name)
            .field("btype", &self.btype)
            .field("usage", &self.usage)
            .field("minsz", &self.minsz)
            .field("magics", &self.magics)
            .finish()
    }
}

impl Prober {
    /// Try every candidate magic location in order.
    ///
    /// A location is only handed to the family predicate when the magic
    /// bytes are present there. The first location the predicate accepts
    /// ends the search. I/O errors are returned immediately.
    pub fn probe(&self, probe: &mut Probe) -> Result<bool, BlockidError> {
        if let Some(minsz) = self.minsz {
            if probe.size() < minsz {
                log::debug!(
                    "Prober::probe - {}: region of {} bytes is below minimum {minsz}",
                    self.name,
                    probe.size()
                );
                return Ok(false);
            }
        }

        for magic in self.magics {
            if !probe.has_magic(magic)? {
                continue;
            }

            log::debug!(
                "Prober::probe - {}: magic {:X?} found at {:#x}",
                self.name,
                magic.magic,
                magic.offset()
            );

            if (self.probe_fn)(probe, *magic)? {
                return Ok(true);
            }
        }

        return Ok(false);
    }
}

/// Ordered list of probers.
///
/// Order is significant: families that share a magic rely on earlier
/// probers having already claimed the more specific cases.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    probers: Vec<Prober>,
}

impl Chain {
    pub fn new(probers: Vec<Prober>) -> Self {
        Self { probers }
    }

    /// Append every prober of `other` after the probers of `self`.
    pub fn then(mut self, other: Chain) -> Self {
        self.probers.extend(other.probers);
        self
    }

    pub fn probers(&self) -> &[Prober] {
        &self.probers
    }

    /// Find a registered prober by the family it reports.
    pub fn find(&self, btype: BlockType) -> Option<&Prober> {
        self.probers.iter().find(|p| p.btype == btype)
    }

    /// Run the probers in order and stop at the first match.
    ///
    /// On a match the prober's family and usage are stamped onto the probe
    /// result and `Ok(true)` is returned. Running out of probers is not an
    /// error: the result stays unset and `Ok(false)` is returned.
    pub fn probe(&self, probe: &mut Probe) -> Result<bool, BlockidError> {
        for prober in &self.probers {
            log::debug!("Chain::probe - trying {}", prober.name);

            if !prober.probe(probe)? {
                continue;
            }

            if probe.result().is_none() {
                probe.push_result(Default::default());
            }
            if let Some(result) = probe.result_mut() {
                result.btype = Some(prober.btype);
                result.usage = Some(prober.usage);
            }

            log::debug!("Chain::probe - matched {}", prober.name);
            return Ok(true);
        }

        return Ok(false);
    }
}
