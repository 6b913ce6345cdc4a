//! Clinical guidance: table-driven, pure.
//!
//! `(stage, risk level, comorbidity flags) -> (guidance text, recommendations)`.
//! Every table is keyed by the closed `CkdStage` enum, so there is no
//! unmapped stage to fall back from.

use serde::Serialize;

use crate::domain::{CkdStage, LabObservation, RiskLevel};

/// Age at which the elderly comorbidity flag is set.
pub const ELDERLY_AGE: f64 = 65.0;
/// Age at which stage 3 and 4 risk is escalated.
pub const ESCALATION_AGE: f64 = 75.0;
/// Stage confidence below which an elderly stage 2 patient is escalated.
pub const LOW_STAGE_CONFIDENCE: f64 = 0.5;
/// Blood pressure at or above which the hypertension flag is set (mmHg).
pub const HYPERTENSION_SYSTOLIC: f64 = 130.0;
pub const HYPERTENSION_DIASTOLIC: f64 = 80.0;

/// Static guidance for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageGuidance {
    pub title: &'static str,
    pub description: &'static str,
    pub clinical_guidance: &'static str,
    pub recommendations: &'static [&'static str],
    pub urgency: RiskLevel,
    /// 0 = continuous monitoring
    pub follow_up_months: u8,
}

#[must_use]
pub fn stage_guidance(stage: CkdStage) -> &'static StageGuidance {
    match stage {
        CkdStage::Stage1 => &STAGE_1,
        CkdStage::Stage2 => &STAGE_2,
        CkdStage::Stage3 => &STAGE_3,
        CkdStage::Stage4 => &STAGE_4,
        CkdStage::Stage5 => &STAGE_5,
    }
}

static STAGE_1: StageGuidance = StageGuidance {
    title: "CKD Stage 1: Normal or High eGFR",
    description: "Kidney function is normal. eGFR ≥ 90",
    clinical_guidance: "No kidney damage detected. Maintain a healthy lifestyle to prevent kidney disease and continue regular health checkups.",
    recommendations: &[
        "Manage blood pressure (target: <120/80 mmHg)",
        "Control blood sugar if diabetic",
        "Reduce salt intake to <5g per day",
        "Maintain healthy weight",
        "Exercise regularly (150 min/week)",
        "Limit alcohol consumption",
        "Avoid NSAIDs unless necessary",
        "Repeat kidney function tests annually",
    ],
    urgency: RiskLevel::Low,
    follow_up_months: 12,
};

static STAGE_2: StageGuidance = StageGuidance {
    title: "CKD Stage 2: Mildly Decreased eGFR",
    description: "Mild reduction in kidney function. eGFR 60-89",
    clinical_guidance: "Minor kidney damage detected. Monitor kidney function regularly and implement preventive measures to slow progression.",
    recommendations: &[
        "Monitor blood pressure closely",
        "Reduce sodium intake to <2.3g per day",
        "Maintain stable blood glucose",
        "Avoid NSAIDs and contrast agents",
        "Moderate protein intake",
        "Regular exercise (150 min/week)",
        "Healthy diet (Mediterranean or DASH)",
        "Repeat kidney function tests every 6-12 months",
        "Consider referral to nephrologist if risk factors present",
    ],
    urgency: RiskLevel::Low,
    follow_up_months: 6,
};

static STAGE_3: StageGuidance = StageGuidance {
    title: "CKD Stage 3: Moderately Decreased eGFR",
    description: "Moderate reduction in kidney function. eGFR 30-59",
    clinical_guidance: "Moderate kidney damage detected. Close monitoring and management are essential; regular physician review slows progression and prevents complications.",
    recommendations: &[
        "Consult with a nephrologist for specialized care",
        "Monitor blood pressure (target: <120/80 mmHg)",
        "Strict sodium restriction (<2g per day)",
        "Restrict protein intake (0.6-0.8g/kg body weight)",
        "Monitor and manage anemia if present",
        "Screen for bone disease",
        "Avoid NSAIDs and nephrotoxic drugs",
        "Monitor potassium and phosphorus levels",
        "Kidney function tests every 3-6 months",
        "Consider ACE inhibitor/ARB therapy if hypertensive or diabetic",
    ],
    urgency: RiskLevel::Moderate,
    follow_up_months: 3,
};

static STAGE_4: StageGuidance = StageGuidance {
    title: "CKD Stage 4: Severely Decreased eGFR",
    description: "Severe reduction in kidney function. eGFR 15-29",
    clinical_guidance: "Severe kidney damage requires intensive management. Plan for renal replacement therapy with frequent nephrology follow-up.",
    recommendations: &[
        "Regular nephrologist visits (monthly or as needed)",
        "Prepare for dialysis or transplant",
        "Strict dietary management (low sodium, potassium, phosphorus, protein)",
        "Fluid restriction may be necessary",
        "Manage bone disease and anemia proactively",
        "Vaccinations (influenza, pneumococcal, hepatitis B)",
        "Cardiovascular risk assessment and management",
        "Monthly kidney function tests",
        "Avoid contrast media; use alternatives when possible",
        "Begin vascular access planning if appropriate",
    ],
    urgency: RiskLevel::High,
    follow_up_months: 1,
};

static STAGE_5: StageGuidance = StageGuidance {
    title: "CKD Stage 5: Kidney Failure",
    description: "Kidney failure requiring renal replacement therapy. eGFR <15",
    clinical_guidance: "End-stage renal disease has been reached. Immediate medical attention is required to start renal replacement therapy.",
    recommendations: &[
        "URGENT: Contact nephrologist or emergency room immediately",
        "Initiate dialysis (hemodialysis or peritoneal) or pursue transplant",
        "Weekly or bi-weekly nephrologist visits",
        "Strict dietary restrictions (low sodium, potassium, phosphorus, fluid, protein)",
        "Manage complications: hypertension, anemia, bone disease, cardiovascular disease",
        "Mental health support and patient education",
        "Manage medications carefully (many are contraindicated)",
        "Coordinate care with dialysis team",
        "Explore kidney transplant options",
        "Palliative care consultation if appropriate",
    ],
    urgency: RiskLevel::Critical,
    follow_up_months: 0,
};

/// Lifestyle advice for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifestyleAdvice {
    pub diet: &'static str,
    pub exercise: &'static str,
    pub fluid: &'static str,
    pub medications: &'static str,
    pub monitoring: String,
}

#[must_use]
pub fn lifestyle_advice(stage: CkdStage) -> LifestyleAdvice {
    let (diet, exercise, fluid, medications) = match stage {
        CkdStage::Stage1 => (
            "No restrictions needed. Maintain a balanced, healthy diet.",
            "150 minutes moderate activity per week (e.g., brisk walking, swimming).",
            "No restriction. Drink adequate fluids daily.",
            "Take prescribed medications as directed. Avoid over-the-counter NSAIDs.",
        ),
        CkdStage::Stage2 => (
            "Reduce salt to <5g/day. Moderate protein intake.",
            "150 minutes moderate activity per week. Avoid strenuous exercise if hypertensive.",
            "No restriction. Stay well hydrated.",
            "Continue regular medications. Avoid NSAIDs and unnecessary supplements.",
        ),
        CkdStage::Stage3 => (
            "Low sodium (<2.3g/day), moderate protein (0.8g/kg/day).",
            "100-150 minutes moderate activity per week. Gradual progression.",
            "Maintain normal hydration. Monitor if hypertensive.",
            "Careful medication management. Avoid NSAIDs and certain antibiotics. ACE/ARB recommended.",
        ),
        CkdStage::Stage4 => (
            "Very low sodium, protein, potassium and phosphorus.",
            "Light to moderate activity as tolerated. Consult a doctor before exercising.",
            "Fluid restriction may apply. Follow the doctor's guidance.",
            "Very careful medication selection. Avoid nephrotoxic drugs. Adjust doses based on eGFR.",
        ),
        CkdStage::Stage5 => (
            "Strict dietary management required. Follow the dietitian's plan closely.",
            "Activities adapted to tolerance. Oxygen support may be needed during exercise.",
            "Strict fluid restriction typically necessary. Daily limit set by the nephrologist.",
            "Strict medication protocol. Most drugs need dose adjustment. Follow prescriptions exactly.",
        ),
    };
    let months = stage_guidance(stage).follow_up_months.max(1);
    LifestyleAdvice {
        diet,
        exercise,
        fluid,
        medications,
        monitoring: format!("Follow-up kidney function tests every {months} month(s)"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    None,
    Info,
    Warning,
    Danger,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertStatus {
    pub level: AlertLevel,
    pub message: Option<&'static str>,
}

#[must_use]
pub fn alert_status(stage: CkdStage) -> AlertStatus {
    let (level, message) = match stage {
        CkdStage::Stage1 => (AlertLevel::None, None),
        CkdStage::Stage2 => (AlertLevel::Info, Some("Regular monitoring recommended")),
        CkdStage::Stage3 => (AlertLevel::Warning, Some("Schedule doctor visit soon")),
        CkdStage::Stage4 => (AlertLevel::Danger, Some("Contact doctor urgently")),
        CkdStage::Stage5 => (
            AlertLevel::Critical,
            Some("CRITICAL: Seek immediate medical attention"),
        ),
    };
    AlertStatus { level, message }
}

/// Conditions known about the patient beyond the lab record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KnownConditions {
    pub diabetes: bool,
}

/// Comorbidity flags that add targeted recommendations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComorbidityFlags {
    pub hypertension: bool,
    pub elderly: bool,
    pub diabetes: bool,
}

impl ComorbidityFlags {
    /// Derive flags from supplied values only; imputed values never set a flag.
    #[must_use]
    pub fn derive(obs: &LabObservation, known: KnownConditions) -> Self {
        let hypertension = obs
            .blood_pressure_systolic
            .is_some_and(|s| s >= HYPERTENSION_SYSTOLIC)
            || obs
                .blood_pressure_diastolic
                .is_some_and(|d| d >= HYPERTENSION_DIASTOLIC);
        Self {
            hypertension,
            elderly: obs.age.is_some_and(|a| a >= ELDERLY_AGE),
            diabetes: known.diabetes,
        }
    }
}

const HYPERTENSION_RECOMMENDATIONS: &[&str] = &[
    "Blood pressure at or above 130/80 mmHg: review antihypertensive therapy",
    "Home blood pressure monitoring",
];

const DIABETES_RECOMMENDATIONS: &[&str] = &[
    "Optimize glycemic control with an individualized HbA1c target",
    "Check urine albumin-to-creatinine ratio at every follow-up",
];

const ELDERLY_RECOMMENDATIONS: &[&str] = &[
    "Review all medication doses for age and kidney function",
    "Screen for frailty and fall risk",
];

/// Risk level from stage, stage confidence and (supplied) age.
///
/// | stage | base     | escalation                                   |
/// |-------|----------|----------------------------------------------|
/// | 1, 2  | low      | stage 2, confidence < 0.5, age ≥ 65: moderate |
/// | 3     | moderate | age ≥ 75: high                               |
/// | 4     | high     | age ≥ 75: critical                           |
/// | 5     | critical |                                              |
#[must_use]
pub fn risk_level(stage: CkdStage, stage_confidence: f64, age: Option<f64>) -> RiskLevel {
    let elderly = age.is_some_and(|a| a >= ELDERLY_AGE);
    let very_elderly = age.is_some_and(|a| a >= ESCALATION_AGE);
    match stage {
        CkdStage::Stage1 => RiskLevel::Low,
        CkdStage::Stage2 if elderly && stage_confidence < LOW_STAGE_CONFIDENCE => {
            RiskLevel::Moderate
        }
        CkdStage::Stage2 => RiskLevel::Low,
        CkdStage::Stage3 if very_elderly => RiskLevel::High,
        CkdStage::Stage3 => RiskLevel::Moderate,
        CkdStage::Stage4 if very_elderly => RiskLevel::Critical,
        CkdStage::Stage4 => RiskLevel::High,
        CkdStage::Stage5 => RiskLevel::Critical,
    }
}

/// Guidance surfaced with a prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guidance {
    pub clinical_guidance: String,
    pub recommendations: Vec<String>,
    pub follow_up_months: u8,
    pub urgency: RiskLevel,
}

/// Build guidance text and the ordered recommendation list.
#[must_use]
pub fn generate(stage: CkdStage, risk: RiskLevel, flags: ComorbidityFlags) -> Guidance {
    let table = stage_guidance(stage);

    let mut clinical_guidance = format!("{}. {}", table.title, table.clinical_guidance);
    if risk > table.urgency {
        clinical_guidance.push_str(&format!(" Risk raised to {risk}: {}.", risk.description()));
    }

    let extras = [
        (flags.hypertension, HYPERTENSION_RECOMMENDATIONS),
        (flags.diabetes, DIABETES_RECOMMENDATIONS),
        (flags.elderly, ELDERLY_RECOMMENDATIONS),
    ];
    let mut recommendations: Vec<String> = Vec::new();
    let candidates = table.recommendations.iter().chain(
        extras
            .iter()
            .filter(|(set, _)| *set)
            .flat_map(|(_, recs)| recs.iter()),
    );
    for rec in candidates {
        if !recommendations.iter().any(|r| r == rec) {
            recommendations.push((*rec).to_string());
        }
    }

    Guidance {
        clinical_guidance,
        recommendations,
        follow_up_months: table.follow_up_months,
        urgency: risk.max(table.urgency),
    }
}
