//! Residual CNN classifier
//!
//! ResNet-style network: 7x7 stem, four stages of basic residual blocks,
//! global average pooling and a linear head. Block counts and widths come
//! from the configuration; `[2, 2, 2, 2]` with 64 base channels is ResNet-18.
//!
//! The network can be split at the second convolution of the very last
//! block so the saliency mapper can attach gradients to that activation.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::config::ModelConfig;

/// Configuration for the ResNetClassifier
#[derive(Config, Debug)]
pub struct ResNetClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Residual blocks in each of the four stages
    #[config(default = "vec![2, 2, 2, 2]")]
    pub layers: Vec<usize>,

    /// Channels of the first stage
    #[config(default = "64")]
    pub base_channels: usize,

    /// Dropout before the linear head
    #[config(default = "0.0")]
    pub dropout_rate: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl ResNetClassifierConfig {
    /// Architecture described by the pipeline configuration
    pub fn from_model_config(model: &ModelConfig, num_classes: usize) -> Self {
        Self::new(num_classes)
            .with_layers(model.layers.clone())
            .with_base_channels(model.base_channels)
            .with_dropout_rate(model.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNetClassifier<B> {
        ResNetClassifier::new(self, device)
    }
}

/// Inference-mode batch normalisation from the running statistics
///
/// Matches `BatchNorm::forward` on a backend without autodiff, but also
/// holds on an autodiff backend where the module would use batch statistics.
pub fn batch_norm_eval<B: Backend>(bn: &BatchNorm<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [channels] = bn.gamma.val().dims();
    let shape = [1, channels, 1, 1];

    let mean = bn.running_mean.value().reshape(shape);
    let std = bn.running_var.value().add_scalar(bn.epsilon).sqrt().reshape(shape);
    let gamma = bn.gamma.val().reshape(shape);
    let beta = bn.beta.val().reshape(shape);

    (x - mean) / std * gamma + beta
}

/// 1x1 strided projection of the shortcut
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }

    pub fn forward_eval(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        batch_norm_eval(&self.bn, self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with a residual shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub downsample: Option<Downsample<B>>,
    pub relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv3x3 = |cin, s| {
            Conv2dConfig::new([cin, out_channels], [3, 3])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device)
        };

        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv3x3(in_channels, stride),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv3x3(out_channels, 1),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.forward_to_conv2(x.clone());
        self.forward_from_conv2(x, out)
    }

    /// Run up to (and including) the second convolution
    pub fn forward_to_conv2(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(x);
        let out = self.relu.forward(self.bn1.forward(out));
        self.conv2.forward(out)
    }

    /// Finish the block from the second convolution output
    pub fn forward_from_conv2(&self, input: Tensor<B, 4>, conv2_out: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(input),
            None => input,
        };
        self.relu.forward(self.bn2.forward(conv2_out) + identity)
    }

    /// `forward_from_conv2` with inference-mode batch norm on any backend
    pub fn forward_from_conv2_eval(&self, input: Tensor<B, 4>, conv2_out: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward_eval(input),
            None => input,
        };
        self.relu.forward(batch_norm_eval(&self.bn2, conv2_out) + identity)
    }
}

/// Activations at the saliency split point
pub struct SplitActivations<B: Backend> {
    /// Input of the last residual block
    pub block_input: Tensor<B, 4>,
    /// Output of that block's second convolution
    pub target: Tensor<B, 4>,
}

/// Residual image classifier
#[derive(Module, Debug)]
pub struct ResNetClassifier<B: Backend> {
    pub stem_conv: Conv2d<B>,
    pub stem_bn: BatchNorm<B>,
    pub stem_pool: MaxPool2d,
    /// Residual blocks of all four stages, in order
    pub blocks: Vec<BasicBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc: Linear<B>,
    pub relu: Relu,
    num_classes: usize,
}

impl<B: Backend> ResNetClassifier<B> {
    pub fn new(config: &ResNetClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_channels;

        let stem_conv = Conv2dConfig::new([config.in_channels, base], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // Stage widths: base, 2*base, 4*base, 8*base; stride 2 from stage 2 on
        let mut blocks = Vec::new();
        let mut in_channels = base;
        for (stage, &count) in config.layers.iter().enumerate() {
            let out_channels = base << stage;
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(in_channels, out_channels, stride, device));
                in_channels = out_channels;
            }
        }

        Self {
            stem_conv,
            stem_bn: BatchNormConfig::new(base).init(device),
            stem_pool,
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            fc: LinearConfig::new(in_channels, config.num_classes).init(device),
            relu: Relu::new(),
            num_classes: config.num_classes,
        }
    }

    /// Logits of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.forward_stem(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.forward_head(x)
    }

    /// Class probabilities, optionally temperature-scaled
    pub fn forward_softmax(&self, x: Tensor<B, 4>, temperature: Option<f32>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        let logits = match temperature {
            Some(t) => logits.div_scalar(t),
            None => logits,
        };
        softmax(logits, 1)
    }

    /// Run up to the second convolution of the last residual block
    pub fn forward_split(&self, x: Tensor<B, 4>) -> SplitActivations<B> {
        let x = self.forward_stem(x);
        let (last, body) = match self.blocks.split_last() {
            Some(split) => split,
            None => {
                return SplitActivations {
                    block_input: x.clone(),
                    target: x,
                }
            }
        };

        let block_input = body.iter().fold(x, |x, block| block.forward(x));
        let target = last.forward_to_conv2(block_input.clone());
        SplitActivations { block_input, target }
    }

    /// Logits from the split point, with inference-mode normalisation and
    /// no dropout whatever the backend
    pub fn forward_from_split_eval(&self, block_input: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = match self.blocks.last() {
            Some(last) => last.forward_from_conv2_eval(block_input, target),
            None => target,
        };
        self.classify(self.pool(x))
    }

    fn forward_stem(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem_conv.forward(x);
        let x = self.relu.forward(self.stem_bn.forward(x));
        self.stem_pool.forward(x)
    }

    fn forward_head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.dropout.forward(self.pool(x));
        self.classify(x)
    }

    /// [B, C, H, W] -> [B, C]
    fn pool(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    fn classify(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny_config(num_classes: usize) -> ResNetClassifierConfig {
        ResNetClassifierConfig::new(num_classes)
            .with_layers(vec![1, 1, 1, 1])
            .with_base_channels(4)
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model: ResNetClassifier<TestBackend> = tiny_config(5).init(&device);

        let input = Tensor::<TestBackend, 4>::random([2, 3, 64, 64], Distribution::Default, &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
        assert_eq!(model.num_classes(), 5);
        assert_eq!(model.blocks.len(), 4);
    }

    #[test]
    fn test_resnet18_layout() {
        let device = Default::default();
        let model: ResNetClassifier<TestBackend> = ResNetClassifierConfig::new(10)
            .with_base_channels(8)
            .init(&device);

        assert_eq!(model.blocks.len(), 8);
        assert!(model.blocks[0].downsample.is_none());
        assert!(model.blocks[2].downsample.is_some());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model: ResNetClassifier<TestBackend> = tiny_config(3).init(&device);
        let input = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);

        for temperature in [None, Some(1.5)] {
            let probs = model.forward_softmax(input.clone(), temperature);
            let sums: Vec<f32> = probs.sum_dim(1).into_data().iter::<f32>().collect();
            assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
        }
    }

    #[test]
    fn test_temperature_scales_logits() {
        let device = Default::default();
        let model: ResNetClassifier<TestBackend> = tiny_config(3).init(&device);
        let input = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let logits = model.forward(input.clone());

        let tempered: Vec<f32> = model
            .forward_softmax(input.clone(), Some(1.5))
            .into_data()
            .iter::<f32>()
            .collect();
        let expected: Vec<f32> = softmax(logits.div_scalar(1.5), 1).into_data().iter::<f32>().collect();
        let plain: Vec<f32> = model.forward_softmax(input, None).into_data().iter::<f32>().collect();

        for (t, e) in tempered.iter().zip(&expected) {
            assert!((t - e).abs() < 1e-6);
        }
        let max = |v: &[f32]| v.iter().copied().fold(f32::MIN, f32::max);
        assert!(max(&tempered) < max(&plain));
    }

    #[test]
    fn test_split_matches_forward() {
        let device = Default::default();
        let model: ResNetClassifier<TestBackend> = tiny_config(4).init(&device);
        let input = Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Default, &device);

        let direct: Vec<f32> = model.forward(input.clone()).into_data().iter::<f32>().collect();
        let split = model.forward_split(input);
        assert_eq!(split.target.dims()[1], 32);
        let resumed: Vec<f32> = model
            .forward_from_split_eval(split.block_input, split.target)
            .into_data()
            .iter::<f32>()
            .collect();

        for (a, b) in direct.iter().zip(&resumed) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
    }
}
