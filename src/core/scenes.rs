use crate::config::FloodConfig;
use crate::core::units::UnitConverter;
use crate::grid::BackscatterGrid;
use crate::types::{BackscatterScale, FloodError, FloodResult, OrbitPass, Polarization};
use chrono::{DateTime, Duration, Utc};
use ndarray::Zip;

/// One single-polarization backscatter acquisition
#[derive(Debug, Clone)]
pub struct Scene {
    pub acquired: DateTime<Utc>,
    pub polarization: Polarization,
    pub pass: OrbitPass,
    pub resolution_m: f64,
    pub scale: BackscatterScale,
    pub grid: BackscatterGrid,
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Pre-event and post-event search ranges around an event date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub before: DateRange,
    pub after: DateRange,
}

impl EventWindow {
    /// `[event - days, event)` and `[event, event + days)`
    pub fn around(event: DateTime<Utc>, days: i64) -> Self {
        let span = Duration::days(days);
        Self {
            before: DateRange {
                start: event - span,
                end: event,
            },
            after: DateRange {
                start: event,
                end: event + span,
            },
        }
    }
}

/// Composited before image and earliest after image
#[derive(Debug, Clone)]
pub struct ScenePair {
    pub before: Scene,
    pub after: Scene,
}

/// Catalogue of candidate scenes for one area
#[derive(Debug, Clone, Default)]
pub struct SceneCollection {
    scenes: Vec<Scene>,
}

impl SceneCollection {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn push(&mut self, scene: Scene) {
        self.scenes.push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter()
    }

    /// Scenes matching polarization, pass, resolution and acquisition range
    pub fn filter(&self, polarization: Polarization, pass: OrbitPass, resolution_m: f64, range: &DateRange) -> Self {
        let scenes: Vec<Scene> = self
            .scenes
            .iter()
            .filter(|s| {
                s.polarization == polarization
                    && s.pass == pass
                    && (s.resolution_m - resolution_m).abs() < 1e-6
                    && range.contains(s.acquired)
            })
            .cloned()
            .collect();
        log::debug!(
            "{} of {} scenes match {} {:?} {} m between {} and {}",
            scenes.len(),
            self.scenes.len(),
            polarization,
            pass,
            resolution_m,
            range.start,
            range.end
        );
        Self { scenes }
    }

    /// Earliest scene
    pub fn first(&self) -> FloodResult<Scene> {
        self.scenes
            .iter()
            .min_by_key(|s| s.acquired)
            .cloned()
            .ok_or_else(|| FloodError::EmptyInput("No scene to select".to_string()))
    }

    /// Composite with the most recent valid pixel on top.
    ///
    /// The result takes its metadata and scale from the most recent scene;
    /// older scenes are converted to that scale.
    pub fn mosaic(&self) -> FloodResult<Scene> {
        let mut ordered: Vec<&Scene> = self.scenes.iter().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(s.acquired));
        let (latest, older) = ordered
            .split_first()
            .ok_or_else(|| FloodError::EmptyInput("No scene to mosaic".to_string()))?;

        let (mut data, mut valid, geo) = latest.grid.clone().into_parts();
        for scene in older {
            latest.grid.ensure_same_footprint(&scene.grid, "scene mosaic")?;
            let grid = UnitConverter::convert(&scene.grid, scene.scale, latest.scale);
            Zip::from(&mut data)
                .and(&mut valid)
                .and(grid.data())
                .and(grid.validity())
                .for_each(|out, ok, &v, &v_ok| {
                    if !*ok && v_ok {
                        *out = v;
                        *ok = true;
                    }
                });
        }
        log::debug!("Mosaicked {} scenes", ordered.len());

        Ok(Scene {
            grid: BackscatterGrid::with_validity(data, valid, geo)?,
            ..(*latest).clone()
        })
    }

    /// Before mosaic and first after scene for an event, using the
    /// configured polarization, pass, resolution and window
    pub fn event_pair(&self, config: &FloodConfig, event: DateTime<Utc>) -> FloodResult<ScenePair> {
        let window = EventWindow::around(event, config.event_window_days);
        let select = |range: &DateRange| {
            self.filter(config.polarization, config.pass_direction, config.resolution_m, range)
        };

        let before = select(&window.before).mosaic().map_err(|_| {
            FloodError::EmptyInput(format!("No pre-event scene between {} and {}", window.before.start, window.before.end))
        })?;
        let after = select(&window.after).first().map_err(|_| {
            FloodError::EmptyInput(format!("No post-event scene between {} and {}", window.after.start, window.after.end))
        })?;
        Ok(ScenePair { before, after })
    }
}

impl FromIterator<Scene> for SceneCollection {
    fn from_iter<I: IntoIterator<Item = Scene>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
